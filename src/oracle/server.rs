// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Timestamp oracle server.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::TIMESTAMP_MASK;
use crate::config::Config;
use crate::coord::{CoordinationError, Coordinator};
use crate::txn::advance_oldest_active;

use super::signal::ShutdownSignal;
use super::OracleError;

#[derive(Debug, Default)]
struct Allocation {
    leading: bool,
    next: u64,
    reserved: u64,
}

struct Core {
    address: String,
    coordinator: Arc<dyn Coordinator>,
    block: u64,
    allocation: Mutex<Allocation>,
}

impl Core {
    fn is_leader(&self) -> Result<bool, OracleError> {
        Ok(self.coordinator.oracle_leader()?.as_deref() == Some(self.address.as_str()))
    }

    fn get_timestamps(&self, instance_id: &str, count: u64) -> Result<u64, OracleError> {
        if count == 0 {
            return Err(OracleError::InvalidRequest("count must be positive".to_string()));
        }

        let mut alloc = self.allocation.lock();
        if !self.is_leader()? {
            alloc.leading = false;
            return Err(OracleError::NotLeader {
                server: self.address.clone(),
            });
        }

        if !alloc.leading {
            let reserved = self.coordinator.oracle_reservation()?;
            alloc.next = reserved + 1;
            alloc.reserved = reserved;
            alloc.leading = true;
            info!(address = %self.address, first = alloc.next, "Oracle took leadership");
        }

        let last = alloc
            .next
            .checked_add(count - 1)
            .filter(|last| *last <= TIMESTAMP_MASK)
            .ok_or(OracleError::Exhausted)?;

        if last > alloc.reserved {
            let new_reserved = last.saturating_add(self.block).min(TIMESTAMP_MASK);
            match self
                .coordinator
                .reserve_oracle_timestamps(alloc.reserved, new_reserved)
            {
                Ok(()) => {
                    debug!(reserved = new_reserved, "Reserved oracle timestamps");
                    alloc.reserved = new_reserved;
                }
                Err(CoordinationError::ReservationConflict { found, .. }) => {
                    // Someone else issued timestamps since we loaded the reservation.
                    warn!(address = %self.address, found, "Lost oracle reservation");
                    alloc.leading = false;
                    return Err(OracleError::NotLeader {
                        server: self.address.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let first = alloc.next;
        alloc.next = last + 1;
        debug!(instance = %instance_id, count, first, "Issued timestamps");
        Ok(first)
    }

    /// Next timestamp this server would hand out, if it is leading.
    fn peek_next(&self) -> Option<u64> {
        let alloc = self.allocation.lock();
        alloc.leading.then_some(alloc.next)
    }

    fn update_floor(&self) -> Result<Option<u64>, OracleError> {
        if !self.is_leader()? {
            return Ok(None);
        }
        match self.peek_next() {
            Some(next) => Ok(Some(advance_oldest_active(self.coordinator.as_ref(), next)?)),
            None => Ok(None),
        }
    }
}

/// The timestamp oracle.
///
/// Many servers may be running; the one elected through the coordinator
/// serves requests and the rest answer [`OracleError::NotLeader`]. Ranges are
/// carved out of a durably reserved block, so a new leader starts above
/// anything a former leader could have issued.
pub struct OracleServer {
    core: Arc<Core>,
    shutdown: Arc<ShutdownSignal>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl OracleServer {
    /// Starts a server at `address` and joins the oracle election.
    ///
    /// Spawns a background thread that advances the oldest-active marker
    /// every `oracle_floor_interval_ms` while this server leads.
    pub fn start(
        address: impl Into<String>,
        coordinator: Arc<dyn Coordinator>,
        config: &Config,
    ) -> Result<Self, OracleError> {
        let core = Arc::new(Core {
            address: address.into(),
            coordinator,
            block: config.oracle_reservation_block.max(1),
            allocation: Mutex::new(Allocation::default()),
        });
        core.coordinator.join_oracle_election(&core.address)?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let interval = config.oracle_floor_interval();

        let core_clone = Arc::clone(&core);
        let shutdown_clone = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            while !shutdown_clone.wait(interval) {
                if let Err(e) = core_clone.update_floor() {
                    warn!(error = %e, "Failed to advance oldest active timestamp");
                }
            }
        });

        info!(address = %core.address, "Oracle server started");
        Ok(Self {
            core,
            shutdown,
            maintenance: Mutex::new(Some(handle)),
        })
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.core.address
    }

    /// Allocates `count` consecutive timestamps and returns the first.
    pub fn get_timestamps(&self, instance_id: &str, count: u64) -> Result<u64, OracleError> {
        self.core.get_timestamps(instance_id, count)
    }

    pub fn is_leader(&self) -> Result<bool, OracleError> {
        self.core.is_leader()
    }

    /// Recomputes the oldest-active marker now instead of waiting for the
    /// maintenance thread. Returns the marker if this server leads.
    pub fn update_oldest_active(&self) -> Result<Option<u64>, OracleError> {
        self.core.update_floor()
    }

    /// Resigns leadership and stops the maintenance thread.
    pub fn close(&self) {
        self.shutdown.raise();
        if let Some(handle) = self.maintenance.lock().take() {
            let _ = handle.join();
        }
        if let Err(e) = self.core.coordinator.resign_oracle(&self.core.address) {
            warn!(address = %self.core.address, error = %e, "Failed to resign oracle leadership");
        }
        self.core.allocation.lock().leading = false;
    }
}

impl Drop for OracleServer {
    fn drop(&mut self) {
        self.close();
    }
}
