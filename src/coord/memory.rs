// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-process coordination service.

use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::info;

use super::{CoordinationError, Coordinator};

#[derive(Default)]
struct State {
    candidates: Vec<String>,
    watchers: Vec<Sender<Option<String>>>,
    next_transactor: u64,
    transactors: HashSet<u64>,
    reservation: u64,
    floors: BTreeMap<u64, u64>,
    oldest_active: u64,
}

impl State {
    fn leader(&self) -> Option<String> {
        self.candidates.first().cloned()
    }

    fn notify_watchers(&mut self) {
        let leader = self.leader();
        self.watchers.retain(|w| w.send(leader.clone()).is_ok());
    }
}

/// A [`Coordinator`] that lives inside the current process.
///
/// Suitable for embedding and tests: several environments and oracle servers
/// in one process can share it through an `Arc`.
#[derive(Default)]
pub struct MemoryCoordinator {
    state: Mutex<State>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Coordinator for MemoryCoordinator {
    fn join_oracle_election(&self, candidate: &str) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        if state.candidates.iter().any(|c| c == candidate) {
            return Ok(());
        }
        state.candidates.push(candidate.to_string());
        if state.candidates.len() == 1 {
            info!(leader = %candidate, "Oracle leader elected");
            state.notify_watchers();
        }
        Ok(())
    }

    fn resign_oracle(&self, candidate: &str) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        let was_leader = state.candidates.first().map(String::as_str) == Some(candidate);
        state.candidates.retain(|c| c != candidate);
        if was_leader {
            info!(old = %candidate, new = ?state.leader(), "Oracle leader resigned");
            state.notify_watchers();
        }
        Ok(())
    }

    fn oracle_leader(&self) -> Result<Option<String>, CoordinationError> {
        Ok(self.state.lock().leader())
    }

    fn watch_oracle_leader(&self) -> Result<Receiver<Option<String>>, CoordinationError> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().watchers.push(tx);
        Ok(rx)
    }

    fn register_transactor(&self) -> Result<u64, CoordinationError> {
        let mut state = self.state.lock();
        state.next_transactor += 1;
        let id = state.next_transactor;
        state.transactors.insert(id);
        Ok(id)
    }

    fn deregister_transactor(&self, id: u64) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        state.floors.remove(&id);
        if !state.transactors.remove(&id) {
            return Err(CoordinationError::UnknownTransactor(id));
        }
        Ok(())
    }

    fn is_transactor_alive(&self, id: u64) -> Result<bool, CoordinationError> {
        Ok(self.state.lock().transactors.contains(&id))
    }

    fn oracle_reservation(&self) -> Result<u64, CoordinationError> {
        Ok(self.state.lock().reservation)
    }

    fn reserve_oracle_timestamps(&self, expected: u64, new: u64) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        if state.reservation != expected {
            return Err(CoordinationError::ReservationConflict {
                expected,
                found: state.reservation,
            });
        }
        state.reservation = new;
        Ok(())
    }

    fn publish_floor(&self, owner: u64, floor: Option<u64>) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        match floor {
            Some(ts) => {
                if !state.transactors.contains(&owner) {
                    return Err(CoordinationError::UnknownTransactor(owner));
                }
                state.floors.insert(owner, ts);
            }
            None => {
                state.floors.remove(&owner);
            }
        }
        Ok(())
    }

    fn published_floors(&self) -> Result<Vec<u64>, CoordinationError> {
        Ok(self.state.lock().floors.values().copied().collect())
    }

    fn oldest_active(&self) -> Result<u64, CoordinationError> {
        Ok(self.state.lock().oldest_active)
    }

    fn advance_oldest_active(&self, ts: u64) -> Result<u64, CoordinationError> {
        let mut state = self.state.lock();
        state.oldest_active = state.oldest_active.max(ts);
        Ok(state.oldest_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_election_order_and_watch() {
        let coord = MemoryCoordinator::new();
        let watch = coord.watch_oracle_leader().unwrap();

        assert_eq!(coord.oracle_leader().unwrap(), None);
        coord.join_oracle_election("a:1").unwrap();
        coord.join_oracle_election("b:2").unwrap();
        assert_eq!(coord.oracle_leader().unwrap().as_deref(), Some("a:1"));
        assert_eq!(watch.try_recv().unwrap().as_deref(), Some("a:1"));
        assert!(watch.try_recv().is_err());

        // A follower resigning does not change the leader.
        coord.join_oracle_election("c:3").unwrap();
        coord.resign_oracle("c:3").unwrap();
        assert!(watch.try_recv().is_err());

        coord.resign_oracle("a:1").unwrap();
        assert_eq!(watch.try_recv().unwrap().as_deref(), Some("b:2"));
        coord.resign_oracle("b:2").unwrap();
        assert_eq!(watch.try_recv().unwrap(), None);
    }

    #[test]
    fn test_transactor_liveness() {
        let coord = MemoryCoordinator::new();
        let a = coord.register_transactor().unwrap();
        let b = coord.register_transactor().unwrap();
        assert_ne!(a, b);
        assert!(coord.is_transactor_alive(a).unwrap());

        coord.deregister_transactor(a).unwrap();
        assert!(!coord.is_transactor_alive(a).unwrap());
        assert!(coord.is_transactor_alive(b).unwrap());
        assert_eq!(
            coord.deregister_transactor(a),
            Err(CoordinationError::UnknownTransactor(a))
        );
    }

    #[test]
    fn test_floors_are_ephemeral() {
        let coord = MemoryCoordinator::new();
        let a = coord.register_transactor().unwrap();
        let b = coord.register_transactor().unwrap();
        coord.publish_floor(a, Some(10)).unwrap();
        coord.publish_floor(b, Some(7)).unwrap();

        let mut floors = coord.published_floors().unwrap();
        floors.sort();
        assert_eq!(floors, vec![7, 10]);

        coord.deregister_transactor(b).unwrap();
        assert_eq!(coord.published_floors().unwrap(), vec![10]);
        coord.publish_floor(a, None).unwrap();
        assert!(coord.published_floors().unwrap().is_empty());
    }

    #[test]
    fn test_oldest_active_is_monotonic() {
        let coord = MemoryCoordinator::new();
        assert_eq!(coord.oldest_active().unwrap(), 0);
        assert_eq!(coord.advance_oldest_active(50).unwrap(), 50);
        assert_eq!(coord.advance_oldest_active(20).unwrap(), 50);
        assert_eq!(coord.oldest_active().unwrap(), 50);
    }

    #[test]
    fn test_reservation_compare_and_set() {
        let coord = MemoryCoordinator::new();
        coord.reserve_oracle_timestamps(0, 1000).unwrap();
        assert_eq!(coord.oracle_reservation().unwrap(), 1000);
        assert!(matches!(
            coord.reserve_oracle_timestamps(0, 2000),
            Err(CoordinationError::ReservationConflict { found: 1000, .. })
        ));
    }
}
