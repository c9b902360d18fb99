// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Resolution of locks left by other transactions.
//!
//! Only the primary column knows a transaction's fate. A lock is rolled
//! forward if the primary already carries a WRITE or DEL_LOCK naming the
//! lock's start timestamp, and rolled back if the primary's lock is gone
//! without one. While the primary is still locked, its lock may only be
//! removed when the owning transactor is dead or has held it past the
//! rollback timeout. Every mutation is conditioned on the exact lock cell,
//! so racing resolvers settle each column once.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use crate::codec::{decode_sort_key, ColumnType, DelLockValue, LockValue, WriteValue};
use crate::env::Environment;
use crate::storage::{Bytes, Cell, Column, Condition, RowMutation, Span};

use super::commit::{commit_column, rollback_column, LockKind};
use super::{TxStats, TxnError};

enum PrimaryStatus {
    Committed { commit_ts: u64 },
    Locked { cell: Cell, lock: LockValue },
    Aborted,
}

pub(crate) struct LockResolver<'a> {
    env: &'a Environment,
    stats: &'a mut TxStats,
}

impl<'a> LockResolver<'a> {
    pub(crate) fn new(env: &'a Environment, stats: &'a mut TxStats) -> Self {
        Self { env, stats }
    }

    /// Resolves the given lock cells.
    ///
    /// Returns the `(transactor, lock_ts)` of every transaction whose locks
    /// were left in place because the transactor is live and still inside the
    /// rollback timeout. Empty means everything was resolved; otherwise the
    /// caller decides whether to wait.
    #[instrument(skip_all, fields(locks = locks.len()))]
    pub(crate) fn resolve(&mut self, locks: &[Cell]) -> Result<Vec<(u64, u64)>, TxnError> {
        let mut by_txn: BTreeMap<(Bytes, Column, u64), Vec<(Cell, LockValue)>> = BTreeMap::new();
        for cell in locks {
            let (kind, lock_ts) = decode_sort_key(cell.sort_key)?;
            if kind != ColumnType::Lock {
                continue;
            }
            let lock = LockValue::decode(cell.value.as_bytes())?;
            by_txn
                .entry((lock.primary_row.clone(), lock.primary_column.clone(), lock_ts))
                .or_default()
                .push((cell.clone(), lock));
        }

        let mut pending = Vec::new();
        for ((row, column, lock_ts), members) in by_txn {
            if let Some(owner) = self.resolve_transaction(&row, &column, lock_ts, &members)? {
                pending.push(owner);
            }
        }
        Ok(pending)
    }

    fn resolve_transaction(
        &mut self,
        row: &Bytes,
        column: &Column,
        lock_ts: u64,
        members: &[(Cell, LockValue)],
    ) -> Result<Option<(u64, u64)>, TxnError> {
        let cache = self.env.transactor_cache();
        loop {
            match self.primary_status(row, column, lock_ts)? {
                PrimaryStatus::Committed { commit_ts } => {
                    self.roll_forward(members, lock_ts, commit_ts)?;
                    for (_, lock) in members {
                        cache.forget(lock.transactor, lock_ts);
                    }
                    return Ok(None);
                }
                PrimaryStatus::Aborted => {
                    self.roll_back(members, lock_ts)?;
                    for (_, lock) in members {
                        cache.forget(lock.transactor, lock_ts);
                    }
                    return Ok(None);
                }
                PrimaryStatus::Locked { cell, lock } => {
                    if !self.may_roll_back(&lock, lock_ts)? {
                        return Ok(Some((lock.transactor, lock_ts)));
                    }
                    // The primary goes first: once its lock is gone the
                    // owner can no longer commit.
                    if self.roll_back_cell(&cell, lock_ts)? {
                        cache.forget(lock.transactor, lock_ts);
                        self.roll_back(members, lock_ts)?;
                        return Ok(None);
                    }
                    debug!(row = %row, column = %column, lock_ts, "Primary changed during rollback, re-reading");
                }
            }
        }
    }

    fn primary_status(
        &self,
        row: &Bytes,
        column: &Column,
        lock_ts: u64,
    ) -> Result<PrimaryStatus, TxnError> {
        let lock_key = ColumnType::Lock.encode(lock_ts)?;
        let relevant = move |c: &Cell| {
            c.sort_key == lock_key
                || ((ColumnType::Write.matches(c.sort_key) || ColumnType::DelLock.matches(c.sort_key))
                    && crate::codec::timestamp_of(c.sort_key) > lock_ts)
        };
        let cells = self
            .env
            .store()
            .scan(&Span::exact(row.clone(), column), Some(&relevant))?;

        let mut locked = None;
        for cell in cells {
            let (kind, ts) = decode_sort_key(cell.sort_key)?;
            let start_ts = match kind {
                ColumnType::Write => WriteValue::decode(cell.value.as_bytes())?.start_ts,
                ColumnType::DelLock => DelLockValue::decode(cell.value.as_bytes())?.start_ts,
                ColumnType::Lock => {
                    let lock = LockValue::decode(cell.value.as_bytes())?;
                    locked = Some(PrimaryStatus::Locked { cell, lock });
                    continue;
                }
                _ => continue,
            };
            if start_ts == lock_ts {
                return Ok(PrimaryStatus::Committed { commit_ts: ts });
            }
        }
        Ok(locked.unwrap_or(PrimaryStatus::Aborted))
    }

    fn may_roll_back(&mut self, lock: &LockValue, lock_ts: u64) -> Result<bool, TxnError> {
        let cache = self.env.transactor_cache();
        if cache.is_dead(self.env.coordinator().as_ref(), lock.transactor)? {
            self.stats.dead_locks += 1;
            warn!(transactor = lock.transactor, lock_ts, "Rolling back lock of dead transactor");
            return Ok(true);
        }
        if cache.is_timed_out(lock.transactor, lock_ts) {
            self.stats.timed_out_locks += 1;
            warn!(
                transactor = lock.transactor,
                lock_ts,
                timeout_ms = cache.timeout().as_millis() as u64,
                "Rolling back timed out lock"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Removes one lock if it is still exactly as seen.
    fn roll_back_cell(&mut self, cell: &Cell, lock_ts: u64) -> Result<bool, TxnError> {
        let mut m = RowMutation::new(cell.row.clone());
        rollback_column(&mut m, &cell.column, lock_ts)?;
        let condition = Condition::exists(&cell.row, &cell.column, cell.sort_key, &cell.value);
        let accepted = self.env.store().apply_if(&condition, m)?.is_accepted();
        if accepted {
            self.stats.rollbacks += 1;
            debug!(row = %cell.row, column = %cell.column, lock_ts, "Rolled back lock");
        }
        Ok(accepted)
    }

    fn roll_back(&mut self, members: &[(Cell, LockValue)], lock_ts: u64) -> Result<(), TxnError> {
        for (cell, _) in members {
            self.roll_back_cell(cell, lock_ts)?;
        }
        Ok(())
    }

    fn roll_forward(
        &mut self,
        members: &[(Cell, LockValue)],
        lock_ts: u64,
        commit_ts: u64,
    ) -> Result<(), TxnError> {
        for (cell, lock) in members {
            let mut m = RowMutation::new(cell.row.clone());
            commit_column(
                &mut m,
                &cell.column,
                LockKind::of(lock),
                lock.is_primary(&cell.row, &cell.column),
                lock_ts,
                commit_ts,
                self.env.observers().is_strong(&cell.column),
            )?;
            let condition = Condition::exists(&cell.row, &cell.column, cell.sort_key, &cell.value);
            if self.env.store().apply_if(&condition, m)?.is_accepted() {
                self.stats.rollforwards += 1;
                debug!(row = %cell.row, column = %cell.column, lock_ts, commit_ts, "Rolled forward lock");
            }
        }
        Ok(())
    }
}
