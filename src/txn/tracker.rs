// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Oldest-active timestamp tracking.
//!
//! Every process keeps the start timestamps of its open transactions in a
//! [`TimestampTracker`] and publishes their minimum to the coordinator. The
//! oracle leader folds all published floors into the oldest-active marker,
//! which version cleanup never goes below and which every read checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::coord::{CoordinationError, Coordinator};
use crate::oracle::OracleClient;

use super::TxnError;

/// Multiset of the start timestamps in use by one process.
pub struct TimestampTracker {
    coordinator: Arc<dyn Coordinator>,
    owner: u64,
    active: Mutex<BTreeMap<u64, usize>>,
}

impl TimestampTracker {
    /// Creates a tracker publishing under the transactor `owner`.
    pub fn new(coordinator: Arc<dyn Coordinator>, owner: u64) -> Self {
        Self {
            coordinator,
            owner,
            active: Mutex::new(BTreeMap::new()),
        }
    }

    /// Obtains a start timestamp from the oracle and tracks it.
    ///
    /// The current marker is tracked as a placeholder while the request is in
    /// flight, so the oracle cannot raise the marker past a timestamp this
    /// process is about to receive.
    pub fn allocate(&self, oracle: &OracleClient) -> Result<u64, TxnError> {
        let placeholder = self.coordinator.oldest_active()?;
        self.add(placeholder)?;
        match oracle.get_timestamp() {
            Ok(ts) => {
                self.replace(placeholder, ts)?;
                Ok(ts)
            }
            Err(e) => {
                self.remove(placeholder)?;
                Err(e.into())
            }
        }
    }

    pub fn add(&self, ts: u64) -> Result<(), CoordinationError> {
        let mut active = self.active.lock();
        *active.entry(ts).or_insert(0) += 1;
        self.publish(&active)
    }

    /// Stops tracking one occurrence of `ts`. Unknown timestamps are ignored.
    pub fn remove(&self, ts: u64) -> Result<(), CoordinationError> {
        let mut active = self.active.lock();
        if !take(&mut active, ts) {
            warn!(ts, "Removing untracked timestamp");
            return Ok(());
        }
        self.publish(&active)
    }

    /// Swaps one occurrence of `old` for `new` with a single publication.
    pub fn replace(&self, old: u64, new: u64) -> Result<(), CoordinationError> {
        let mut active = self.active.lock();
        take(&mut active, old);
        *active.entry(new).or_insert(0) += 1;
        self.publish(&active)
    }

    /// Smallest tracked timestamp.
    pub fn oldest(&self) -> Option<u64> {
        self.active.lock().keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    fn publish(&self, active: &BTreeMap<u64, usize>) -> Result<(), CoordinationError> {
        let floor = active.keys().next().copied();
        debug!(owner = self.owner, floor = ?floor, "Publishing oldest active timestamp");
        self.coordinator.publish_floor(self.owner, floor)
    }
}

fn take(active: &mut BTreeMap<u64, usize>, ts: u64) -> bool {
    match active.get_mut(&ts) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            active.remove(&ts);
            true
        }
        None => false,
    }
}

/// Raises the oldest-active marker to the minimum published floor, or to
/// `fallback` when no process has a transaction open. Returns the marker.
pub fn advance_oldest_active(
    coordinator: &dyn Coordinator,
    fallback: u64,
) -> Result<u64, CoordinationError> {
    let target = coordinator
        .published_floors()?
        .into_iter()
        .min()
        .unwrap_or(fallback);
    coordinator.advance_oldest_active(target)
}
