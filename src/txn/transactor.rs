// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transactor identity and liveness caching.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::coord::{CoordinationError, Coordinator};

/// An ephemeral transactor registration.
///
/// Every lock records the transactor that wrote it. While the registration
/// exists, other processes treat the lock as held by a live owner; once it is
/// gone they may roll the lock back immediately.
pub struct TransactorNode {
    id: u64,
    coordinator: Arc<dyn Coordinator>,
    closed: AtomicBool,
}

impl TransactorNode {
    /// Registers a new transactor.
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Result<Self, CoordinationError> {
        let id = coordinator.register_transactor()?;
        info!(transactor = id, "Registered transactor");
        Ok(Self {
            id,
            coordinator,
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true if the registration still exists.
    pub fn is_alive(&self) -> Result<bool, CoordinationError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.coordinator.is_transactor_alive(self.id)
    }

    /// Removes the registration. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.coordinator.deregister_transactor(self.id) {
            Ok(()) => info!(transactor = self.id, "Deregistered transactor"),
            Err(e) => warn!(transactor = self.id, error = %e, "Failed to deregister transactor"),
        }
    }
}

impl Drop for TransactorNode {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remembers what this process has learned about other transactors.
///
/// Dead transactors never come back, so they are cached for good. For live
/// ones the cache records when each of their locks was first seen, which is
/// what the rollback timeout is measured from. A clock nobody has consulted
/// for a full timeout is dropped; if its lock is still there the next look
/// starts it again.
pub struct TransactorCache {
    timeout: Duration,
    dead: Mutex<HashSet<u64>>,
    clocks: Mutex<HashMap<(u64, u64), LockClock>>,
}

#[derive(Clone, Copy)]
struct LockClock {
    first_seen: Instant,
    last_checked: Instant,
}

impl TransactorCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dead: Mutex::new(HashSet::new()),
            clocks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `transactor` is no longer registered.
    pub fn is_dead(
        &self,
        coordinator: &dyn Coordinator,
        transactor: u64,
    ) -> Result<bool, CoordinationError> {
        if self.dead.lock().contains(&transactor) {
            return Ok(true);
        }
        if coordinator.is_transactor_alive(transactor)? {
            return Ok(false);
        }
        self.dead.lock().insert(transactor);
        Ok(true)
    }

    /// Returns true once the lock at `lock_ts` held by `transactor` has been
    /// known to this process for longer than the rollback timeout. The first
    /// call for a lock starts its clock.
    pub fn is_timed_out(&self, transactor: u64, lock_ts: u64) -> bool {
        let now = Instant::now();
        let timeout = self.timeout;
        let mut clocks = self.clocks.lock();
        let key = (transactor, lock_ts);
        if !clocks.contains_key(&key) {
            clocks.retain(|_, clock| now.duration_since(clock.last_checked) < timeout);
        }
        let clock = clocks.entry(key).or_insert(LockClock {
            first_seen: now,
            last_checked: now,
        });
        clock.last_checked = now;
        now.duration_since(clock.first_seen) >= timeout
    }

    /// Drops the timeout clock of a resolved lock.
    pub fn forget(&self, transactor: u64, lock_ts: u64) {
        self.clocks.lock().remove(&(transactor, lock_ts));
    }

    /// Number of lock clocks currently running.
    pub fn tracked_locks(&self) -> usize {
        self.clocks.lock().len()
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
