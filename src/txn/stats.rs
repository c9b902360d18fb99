// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock resolution counters.

/// What a transaction had to do about other transactions' locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Locks resolved because their transactor was no longer registered.
    pub dead_locks: u64,
    /// Locks resolved because a live transactor held them past the rollback
    /// timeout.
    pub timed_out_locks: u64,
    /// Times a read backed off waiting for a live lock.
    pub lock_waits: u64,
    /// Lock cells removed.
    pub rollbacks: u64,
    /// Lock cells committed on behalf of their owner.
    pub rollforwards: u64,
}

impl TxStats {
    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &TxStats) {
        self.dead_locks += other.dead_locks;
        self.timed_out_locks += other.timed_out_locks;
        self.lock_waits += other.lock_waits;
        self.rollbacks += other.rollbacks;
        self.rollforwards += other.rollforwards;
    }
}
