// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Snapshot-isolated transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::codec::{encode_notify_qualifier, ColumnType, NOTIFY_FAMILY};
use crate::env::Environment;
use crate::observer::{Notification, NotificationType};
use crate::storage::{Bytes, Cell, Column, Condition, ConditionalStatus, RowMutation, Span};

use super::commit::{
    classify_rejection, commit_column, rollback_column, CommitData, PendingColumn,
    PrewriteFilter, Rejection, Update,
};
use super::resolver::LockResolver;
use super::snapshot;
use super::{TransactorNode, TxStats, TxnError};

/// First pause when a read meets a lock of a live transactor.
const INITIAL_LOCK_WAIT: Duration = Duration::from_millis(10);
const MAX_LOCK_WAIT: Duration = Duration::from_millis(500);

/// Where a transaction is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Reading and buffering writes.
    Active,
    /// Every column is locked.
    PreCommitted,
    /// The primary is committed; the transaction is decided.
    PrimaryCommitted,
    Done,
    /// Locks were lost or released before the primary commit.
    RolledBack,
    /// Finishing the secondaries failed after the primary commit. Any reader
    /// that meets the remaining locks rolls them forward.
    UnknownAfterPrimary,
    /// A read fell below the oldest-active floor.
    Stale,
}

/// A transaction reading at its start timestamp and writing at its commit
/// timestamp.
///
/// The start timestamp is taken from the oracle on first use. Writes are
/// buffered until [`commit`](Transaction::commit), which runs the lock,
/// primary and secondary phases; each phase is also public so callers can
/// drive and interrupt the protocol step by step.
pub struct Transaction {
    env: Arc<Environment>,
    transactor: Arc<TransactorNode>,
    start_ts: Option<u64>,
    updates: BTreeMap<(Bytes, Column), Update>,
    weak_notifications: BTreeSet<(Bytes, Column)>,
    trigger: Option<(Notification, NotificationType)>,
    status: TxStatus,
    stats: TxStats,
    closed: bool,
}

impl Transaction {
    /// Creates a transaction locking under the environment's transactor.
    pub fn new(env: &Arc<Environment>) -> Self {
        Self::with_transactor(env, Arc::clone(env.transactor()))
    }

    /// Creates a transaction whose locks name `transactor`.
    pub fn with_transactor(env: &Arc<Environment>, transactor: Arc<TransactorNode>) -> Self {
        Self {
            env: Arc::clone(env),
            transactor,
            start_ts: None,
            updates: BTreeMap::new(),
            weak_notifications: BTreeSet::new(),
            trigger: None,
            status: TxStatus::Active,
            stats: TxStats::default(),
            closed: false,
        }
    }

    /// Creates a transaction processing `notification`. Committing it
    /// removes the notification.
    pub fn with_trigger(
        env: &Arc<Environment>,
        notification: Notification,
    ) -> Result<Self, TxnError> {
        let kind = env
            .observers()
            .notification_type(&notification.column)
            .ok_or_else(|| {
                TxnError::InvalidArgument(format!(
                    "column {} is not observed",
                    notification.column
                ))
            })?;
        let mut tx = Self::new(env);
        tx.trigger = Some((notification, kind));
        Ok(tx)
    }

    /// Start timestamp, obtaining one from the oracle on first call.
    pub fn start_ts(&mut self) -> Result<u64, TxnError> {
        if let Some(ts) = self.start_ts {
            return Ok(ts);
        }
        if self.closed {
            return Err(TxnError::Unusable);
        }
        let ts = self.env.tracker().allocate(self.env.oracle())?;
        self.start_ts = Some(ts);
        debug!(start_ts = ts, transactor = self.transactor.id(), "Transaction started");
        Ok(ts)
    }

    #[inline]
    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Lock resolution this transaction performed so far.
    #[inline]
    pub fn stats(&self) -> TxStats {
        self.stats
    }

    pub fn trigger(&self) -> Option<&Notification> {
        self.trigger.as_ref().map(|(n, _)| n)
    }

    /// Reads one cell.
    pub fn get(&mut self, row: impl Into<Bytes>, column: &Column) -> Result<Option<Bytes>, TxnError> {
        let row = row.into();
        let mut values = self.read(&Span::exact(row.clone(), column), None)?;
        Ok(values.remove(&(row, column.clone())))
    }

    /// Reads several columns of one row. Absent columns are left out.
    pub fn get_columns(
        &mut self,
        row: impl Into<Bytes>,
        columns: &[Column],
    ) -> Result<BTreeMap<Column, Bytes>, TxnError> {
        let values = self.read(&Span::row(row), Some(columns))?;
        Ok(values.into_iter().map(|((_, col), v)| (col, v)).collect())
    }

    /// Reads every visible cell in `span`.
    pub fn scan(&mut self, span: &Span) -> Result<BTreeMap<(Bytes, Column), Bytes>, TxnError> {
        self.read(span, None)
    }

    pub fn set(
        &mut self,
        row: impl Into<Bytes>,
        column: &Column,
        value: impl Into<Bytes>,
    ) -> Result<(), TxnError> {
        self.expect_status(TxStatus::Active)?;
        check_writable(column)?;
        self.updates
            .insert((row.into(), column.clone()), Update::Set(value.into()));
        Ok(())
    }

    pub fn delete(&mut self, row: impl Into<Bytes>, column: &Column) -> Result<(), TxnError> {
        self.expect_status(TxStatus::Active)?;
        check_writable(column)?;
        self.updates.insert((row.into(), column.clone()), Update::Delete);
        Ok(())
    }

    /// Asks for the weak observer of `column` to run on `row` after commit.
    pub fn weak_notify(&mut self, row: impl Into<Bytes>, column: &Column) -> Result<(), TxnError> {
        self.expect_status(TxStatus::Active)?;
        if !self.env.observers().is_weak(column) {
            return Err(TxnError::InvalidArgument(format!(
                "column {} is not weakly observed",
                column
            )));
        }
        self.weak_notifications.insert((row.into(), column.clone()));
        Ok(())
    }

    /// Commits the buffered writes.
    ///
    /// Fails with [`TxnError::CommitConflict`] if another transaction wrote
    /// or locked a column first, and with [`TxnError::AlreadyAcknowledged`]
    /// if the notification this transaction processes was handled already.
    /// Nothing is applied on failure.
    #[instrument(skip_all, fields(start_ts = ?self.start_ts, updates = self.updates.len()))]
    pub fn commit(&mut self) -> Result<(), TxnError> {
        self.expect_status(TxStatus::Active)?;
        let strong_trigger = matches!(self.trigger, Some((_, NotificationType::Strong)));
        if self.updates.is_empty() && !strong_trigger {
            return self.commit_without_locks();
        }

        let mut cd = self.create_commit_data()?;
        self.pre_commit(&mut cd)?;

        let commit_ts = match self.env.oracle().get_timestamp() {
            Ok(ts) => ts,
            Err(e) => {
                self.release_locks(&mut cd);
                self.status = TxStatus::RolledBack;
                return Err(e.into());
            }
        };

        if !self.commit_primary_column(&cd, commit_ts)? {
            let (row, column) = cd
                .primary()
                .map(|(r, c)| (r.clone(), c.clone()))
                .unwrap_or_default();
            return Err(TxnError::CommitConflict { row, column });
        }
        self.finish_commit(&cd, commit_ts)
    }

    /// Collects the columns a commit will lock.
    pub fn create_commit_data(&mut self) -> Result<CommitData, TxnError> {
        self.expect_status(TxStatus::Active)?;
        let start_ts = self.start_ts()?;

        let mut columns: Vec<PendingColumn> = self
            .updates
            .iter()
            .map(|((row, column), update)| PendingColumn {
                row: row.clone(),
                column: column.clone(),
                update: Some(update.clone()),
                trigger: false,
                lock: Bytes::empty(),
            })
            .collect();

        if let Some((n, NotificationType::Strong)) = &self.trigger {
            match columns
                .iter_mut()
                .find(|c| c.row == n.row && c.column == n.column)
            {
                Some(pending) => pending.trigger = true,
                None => {
                    columns.push(PendingColumn {
                        row: n.row.clone(),
                        column: n.column.clone(),
                        update: None,
                        trigger: true,
                        lock: Bytes::empty(),
                    });
                    columns.sort_by(|a, b| (&a.row, &a.column).cmp(&(&b.row, &b.column)));
                }
            }
        }

        if columns.is_empty() {
            return Err(TxnError::InvalidArgument("nothing to commit".to_string()));
        }
        Ok(CommitData::new(start_ts, columns))
    }

    /// Locks every column. The primary is the strong trigger column if there
    /// is one, otherwise the first column.
    pub fn pre_commit(&mut self, cd: &mut CommitData) -> Result<(), TxnError> {
        let primary = cd.columns.iter().position(|c| c.trigger).unwrap_or(0);
        self.lock_all(cd, primary)
    }

    /// Locks every column with the given column as primary.
    pub fn pre_commit_with_primary(
        &mut self,
        cd: &mut CommitData,
        row: &Bytes,
        column: &Column,
    ) -> Result<(), TxnError> {
        let primary = cd.position(row, column).ok_or_else(|| {
            TxnError::InvalidArgument(format!("{}/{} is not part of the commit", row, column))
        })?;
        self.lock_all(cd, primary)
    }

    fn lock_all(&mut self, cd: &mut CommitData, primary: usize) -> Result<(), TxnError> {
        self.expect_status(TxStatus::Active)?;
        if primary >= cd.columns.len() {
            return Err(TxnError::InvalidArgument("no columns to lock".to_string()));
        }

        let transactor = self.transactor.id();
        let primary_column = cd.columns[primary].clone();
        for pending in cd.columns.iter_mut() {
            pending.lock = pending.lock_value(&primary_column, transactor).encode();
        }
        cd.primary = Some(primary);

        // The primary is locked first so a secondary lock always implies a
        // primary lock or a decision on the primary.
        let order: Vec<usize> = std::iter::once(primary)
            .chain((0..cd.columns.len()).filter(|i| *i != primary))
            .collect();
        for idx in order {
            if let Err(e) = self.lock_column(cd, idx) {
                debug!(error = %e, locked = cd.locked.len(), "Lock acquisition failed, releasing");
                self.release_locks(cd);
                self.status = TxStatus::RolledBack;
                return Err(e);
            }
            cd.locked.push(idx);
        }

        self.status = TxStatus::PreCommitted;
        Ok(())
    }

    fn lock_column(&mut self, cd: &CommitData, idx: usize) -> Result<(), TxnError> {
        let pending = &cd.columns[idx];
        let filter = PrewriteFilter {
            start_ts: cd.start_ts,
            ack_after: if pending.trigger {
                self.trigger.as_ref().map(|(n, _)| n.timestamp)
            } else {
                None
            },
        };
        let lock_key = ColumnType::Lock.encode(cd.start_ts)?;
        let data_key = ColumnType::Data.encode(cd.start_ts)?;

        for attempt in 0..2 {
            let mut m = RowMutation::new(pending.row.clone());
            if let Some(Update::Set(value)) = &pending.update {
                m.put(&pending.column, data_key, value.clone());
            }
            m.put(&pending.column, lock_key, pending.lock.clone());

            let condition = Condition::none_match(&pending.row, &pending.column, &filter);
            let conflicts = match self.env.store().apply_if(&condition, m)? {
                ConditionalStatus::Accepted => return Ok(()),
                ConditionalStatus::Rejected { conflicts } => conflicts,
            };

            match classify_rejection(conflicts)? {
                Rejection::Write => break,
                Rejection::Acknowledged => {
                    return Err(TxnError::AlreadyAcknowledged {
                        row: pending.row.clone(),
                        column: pending.column.clone(),
                    });
                }
                Rejection::Locked(locks) => {
                    if attempt > 0
                        || !LockResolver::new(&self.env, &mut self.stats)
                            .resolve(&locks)?
                            .is_empty()
                    {
                        break;
                    }
                }
            }
        }

        Err(TxnError::CommitConflict {
            row: pending.row.clone(),
            column: pending.column.clone(),
        })
    }

    /// Removes the locks this transaction acquired. Failures are left for
    /// other transactions to roll back.
    fn release_locks(&mut self, cd: &mut CommitData) {
        for idx in cd.locked.drain(..) {
            let pending = &cd.columns[idx];
            let mut m = RowMutation::new(pending.row.clone());
            let result = rollback_column(&mut m, &pending.column, cd.start_ts)
                .map_err(TxnError::from)
                .and_then(|()| self.env.store().apply(m).map_err(TxnError::from));
            if let Err(e) = result {
                warn!(row = %pending.row, column = %pending.column, error = %e, "Failed to release lock");
            }
        }
    }

    /// Commits the primary column at `commit_ts`, deciding the transaction.
    ///
    /// Returns false if the primary lock was rolled back by another
    /// transaction. Fails with [`TxnError::Fatal`] if this transaction's
    /// transactor is no longer registered, or if the lock is still present
    /// after the conditional commit was rejected.
    pub fn commit_primary_column(
        &mut self,
        cd: &CommitData,
        commit_ts: u64,
    ) -> Result<bool, TxnError> {
        self.expect_status(TxStatus::PreCommitted)?;
        if commit_ts <= cd.start_ts {
            return Err(TxnError::InvalidArgument(format!(
                "commit timestamp {} is not after start timestamp {}",
                commit_ts, cd.start_ts
            )));
        }
        if !self.transactor.is_alive()? {
            return Err(TxnError::Fatal(format!(
                "transactor {} is no longer registered, its locks may be rolled back",
                self.transactor.id()
            )));
        }

        let idx = cd
            .primary
            .ok_or_else(|| TxnError::InvalidArgument("commit data has no primary".to_string()))?;
        let primary = &cd.columns[idx];
        let mut m = RowMutation::new(primary.row.clone());
        commit_column(
            &mut m,
            &primary.column,
            primary.kind(),
            true,
            cd.start_ts,
            commit_ts,
            self.env.observers().is_strong(&primary.column),
        )?;

        let lock_key = ColumnType::Lock.encode(cd.start_ts)?;
        let condition = Condition::exists(&primary.row, &primary.column, lock_key, &primary.lock);
        if self.env.store().apply_if(&condition, m)?.is_accepted() {
            debug!(start_ts = cd.start_ts, commit_ts, row = %primary.row, "Committed primary");
            self.status = TxStatus::PrimaryCommitted;
            return Ok(true);
        }

        let still_locked = self
            .env
            .store()
            .scan(
                &Span::exact(primary.row.clone(), &primary.column),
                Some(&|c: &Cell| c.sort_key == lock_key),
            )?
            .iter()
            .any(|c| c.value == primary.lock);
        if still_locked {
            return Err(TxnError::Fatal(format!(
                "primary lock {}/{} still present after rejected commit",
                primary.row, primary.column
            )));
        }

        info!(start_ts = cd.start_ts, row = %primary.row, column = %primary.column, "Primary lock was rolled back by another transaction");
        self.status = TxStatus::RolledBack;
        Ok(false)
    }

    /// Commits the secondary columns, writes pending notifications and marks
    /// the primary done. Safe to run again after a failure.
    pub fn finish_commit(&mut self, cd: &CommitData, commit_ts: u64) -> Result<(), TxnError> {
        if self.status != TxStatus::UnknownAfterPrimary {
            self.expect_status(TxStatus::PrimaryCommitted)?;
        }
        match self.finish_secondaries(cd, commit_ts) {
            Ok(()) => {
                self.status = TxStatus::Done;
                debug!(start_ts = cd.start_ts, commit_ts, columns = cd.len(), "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(start_ts = cd.start_ts, commit_ts, error = %e, "Failed to finish commit");
                self.status = TxStatus::UnknownAfterPrimary;
                Err(e)
            }
        }
    }

    fn finish_secondaries(&self, cd: &CommitData, commit_ts: u64) -> Result<(), TxnError> {
        let primary = cd
            .primary
            .ok_or_else(|| TxnError::InvalidArgument("commit data has no primary".to_string()))?;
        let store = self.env.store();
        let lock_key = ColumnType::Lock.encode(cd.start_ts)?;

        for &idx in cd.locked.iter().filter(|idx| **idx != primary) {
            let pending = &cd.columns[idx];
            let mut m = RowMutation::new(pending.row.clone());
            commit_column(
                &mut m,
                &pending.column,
                pending.kind(),
                false,
                cd.start_ts,
                commit_ts,
                self.env.observers().is_strong(&pending.column),
            )?;
            let condition = Condition::exists(&pending.row, &pending.column, lock_key, &pending.lock);
            if !store.apply_if(&condition, m)?.is_accepted() {
                debug!(row = %pending.row, column = %pending.column, "Secondary already rolled forward");
            }
        }

        self.write_weak_notifications(commit_ts)?;
        self.delete_weak_trigger(cd.start_ts)?;

        let primary = &cd.columns[primary];
        let mut m = RowMutation::new(primary.row.clone());
        m.put(
            &primary.column,
            ColumnType::TxDone.encode(cd.start_ts)?,
            Bytes::empty(),
        );
        store.apply(m)?;
        Ok(())
    }

    /// A commit with nothing to lock only has notification bookkeeping to do.
    fn commit_without_locks(&mut self) -> Result<(), TxnError> {
        if !self.weak_notifications.is_empty() {
            let commit_ts = self.env.oracle().get_timestamp()?;
            self.write_weak_notifications(commit_ts)?;
        }
        if self.trigger.is_some() {
            let start_ts = self.start_ts()?;
            self.delete_weak_trigger(start_ts)?;
        }
        self.status = TxStatus::Done;
        Ok(())
    }

    fn write_weak_notifications(&self, commit_ts: u64) -> Result<(), TxnError> {
        for (row, column) in &self.weak_notifications {
            let mut m = RowMutation::new(row.clone());
            m.put(&encode_notify_qualifier(column), commit_ts, Bytes::empty());
            self.env.store().apply(m)?;
        }
        Ok(())
    }

    /// Removes the processed weak notification. Notifications written after
    /// `start_ts` survive and run the observer again.
    fn delete_weak_trigger(&self, start_ts: u64) -> Result<(), TxnError> {
        if let Some((n, NotificationType::Weak)) = &self.trigger {
            let mut m = RowMutation::new(n.row.clone());
            m.delete_up_to(&encode_notify_qualifier(&n.column), start_ts);
            self.env.store().apply(m)?;
        }
        Ok(())
    }

    /// Releases the start timestamp. Uncommitted locks are left for other
    /// transactions to roll back.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(ts) = self.start_ts {
            if let Err(e) = self.env.tracker().remove(ts) {
                warn!(start_ts = ts, error = %e, "Failed to release start timestamp");
            }
        }
        self.env.record_stats(&self.stats);
    }

    fn read(
        &mut self,
        span: &Span,
        columns: Option<&[Column]>,
    ) -> Result<BTreeMap<(Bytes, Column), Bytes>, TxnError> {
        self.expect_status(TxStatus::Active)?;
        let start_ts = self.start_ts()?;

        let mut wait = INITIAL_LOCK_WAIT;
        let mut waited_on: BTreeSet<(u64, u64)> = BTreeSet::new();
        let view = loop {
            self.check_floor(start_ts)?;
            let cells = match columns {
                Some(wanted) => {
                    let filter = |c: &Cell| wanted.contains(&c.column);
                    self.env.store().scan(span, Some(&filter))?
                }
                None => self.env.store().scan(span, None)?,
            };
            let view = match snapshot::read_cells(&cells, start_ts) {
                Err(e @ TxnError::StaleScan { .. }) => {
                    self.status = TxStatus::Stale;
                    return Err(e);
                }
                other => other?,
            };
            if view.locks.is_empty() {
                break view;
            }
            let pending = LockResolver::new(&self.env, &mut self.stats).resolve(&view.locks)?;
            if !pending.is_empty() {
                waited_on.extend(pending);
                self.stats.lock_waits += 1;
                debug!(
                    start_ts,
                    locks = view.locks.len(),
                    wait_ms = wait.as_millis() as u64,
                    "Waiting on locks of live transactors"
                );
                std::thread::sleep(wait);
                wait = (wait * 2).min(MAX_LOCK_WAIT);
            }
        };
        // Every lock waited on is resolved by now.
        for (transactor, lock_ts) in waited_on {
            self.env.transactor_cache().forget(transactor, lock_ts);
        }

        let mut values = view.values;
        for ((row, column), update) in &self.updates {
            if !span.contains_row(row) || !span.matches_column(column) {
                continue;
            }
            if columns.map_or(false, |wanted| !wanted.contains(column)) {
                continue;
            }
            let key = (row.clone(), column.clone());
            match update {
                Update::Set(value) => {
                    values.insert(key, value.clone());
                }
                Update::Delete => {
                    values.remove(&key);
                }
            }
        }
        Ok(values)
    }

    fn check_floor(&mut self, start_ts: u64) -> Result<(), TxnError> {
        let floor = self.env.coordinator().oldest_active()?;
        if start_ts < floor {
            warn!(start_ts, floor, "Stale scan");
            self.status = TxStatus::Stale;
            return Err(TxnError::StaleScan { start_ts, floor });
        }
        Ok(())
    }

    fn expect_status(&self, expected: TxStatus) -> Result<(), TxnError> {
        if self.closed {
            return Err(TxnError::Unusable);
        }
        if self.status == expected {
            return Ok(());
        }
        match self.status {
            TxStatus::PrimaryCommitted | TxStatus::Done | TxStatus::UnknownAfterPrimary => {
                Err(TxnError::AlreadyCommitted)
            }
            TxStatus::RolledBack | TxStatus::Stale => Err(TxnError::Unusable),
            other => Err(TxnError::InvalidArgument(format!(
                "transaction is {:?}, expected {:?}",
                other, expected
            ))),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_writable(column: &Column) -> Result<(), TxnError> {
    if column.family.as_bytes() == NOTIFY_FAMILY.as_bytes() {
        return Err(TxnError::InvalidArgument(format!(
            "family {} is reserved for notifications",
            NOTIFY_FAMILY
        )));
    }
    Ok(())
}
