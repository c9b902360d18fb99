// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Coordination service abstraction.
//!
//! The transaction layer leans on a ZooKeeper-like service for four things:
//!
//! - electing the oracle leader and watching who it is,
//! - ephemeral liveness registration of transactors,
//! - durably persisting the oracle's reserved timestamp ceiling,
//! - the per-process floors and the oldest-active marker behind the
//!   stale-scan guard.
//!
//! [`MemoryCoordinator`] implements all of it in process.

mod error;
mod memory;

use std::sync::mpsc::Receiver;

pub use error::CoordinationError;
pub use memory::MemoryCoordinator;

/// Operations the transaction layer needs from the coordination service.
pub trait Coordinator: Send + Sync {
    /// Adds `candidate` (an oracle address) to the oracle election. The
    /// earliest live candidate is the leader.
    fn join_oracle_election(&self, candidate: &str) -> Result<(), CoordinationError>;

    /// Removes `candidate` from the election, handing leadership to the next
    /// candidate if it was leading.
    fn resign_oracle(&self, candidate: &str) -> Result<(), CoordinationError>;

    /// Current oracle leader, if any.
    fn oracle_leader(&self) -> Result<Option<String>, CoordinationError>;

    /// Subscribes to leader changes. Every change sends the new leader.
    fn watch_oracle_leader(&self) -> Result<Receiver<Option<String>>, CoordinationError>;

    /// Registers a new live transactor and returns its identity.
    fn register_transactor(&self) -> Result<u64, CoordinationError>;

    /// Removes a transactor registration along with its published floor.
    fn deregister_transactor(&self, id: u64) -> Result<(), CoordinationError>;

    fn is_transactor_alive(&self, id: u64) -> Result<bool, CoordinationError>;

    /// Highest timestamp the oracle has durably reserved.
    fn oracle_reservation(&self) -> Result<u64, CoordinationError>;

    /// Replaces the reservation if it still equals `expected`.
    fn reserve_oracle_timestamps(&self, expected: u64, new: u64) -> Result<(), CoordinationError>;

    /// Publishes (or clears, with `None`) the oldest start timestamp in use by
    /// the process owning transactor `owner`.
    fn publish_floor(&self, owner: u64, floor: Option<u64>) -> Result<(), CoordinationError>;

    /// All currently published floors.
    fn published_floors(&self) -> Result<Vec<u64>, CoordinationError>;

    /// The oldest-active marker. Zero until first advanced.
    fn oldest_active(&self) -> Result<u64, CoordinationError>;

    /// Raises the oldest-active marker to `ts` if that is higher, returning
    /// the marker afterwards. The marker never moves backwards.
    fn advance_oldest_active(&self, ts: u64) -> Result<u64, CoordinationError>;
}
