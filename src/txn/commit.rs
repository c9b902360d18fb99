// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Building blocks of the two-phase commit.
//!
//! A transaction locks every column it changes at its start timestamp, then
//! commits the primary column at a commit timestamp, then the secondaries.
//! The mutations that turn a LOCK into a WRITE or DEL_LOCK are shared with
//! the lock resolver, which completes them on behalf of transactions that
//! died after their primary commit.

use crate::codec::{
    decode_sort_key, encode_notify_qualifier, CodecError, ColumnType, DelLockValue, LockValue,
    WriteValue,
};
use crate::storage::{Bytes, Cell, CellFilter, Column, RowMutation};

/// A buffered change to one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Set(Bytes),
    Delete,
}

/// What kind of lock a column holds. Mirrors the flags of [`LockValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockKind {
    /// The lock guards a value change rather than just an acknowledgment.
    pub write: bool,
    pub delete: bool,
    pub trigger: bool,
}

impl LockKind {
    pub(crate) fn of(lock: &LockValue) -> Self {
        Self {
            write: lock.write,
            delete: lock.delete,
            trigger: lock.trigger,
        }
    }
}

/// One column a commit will lock.
#[derive(Debug, Clone)]
pub(crate) struct PendingColumn {
    pub row: Bytes,
    pub column: Column,
    /// `None` for the acknowledgment-only lock of a strong trigger.
    pub update: Option<Update>,
    pub trigger: bool,
    /// Encoded lock value, set once the primary is chosen.
    pub lock: Bytes,
}

impl PendingColumn {
    pub(crate) fn kind(&self) -> LockKind {
        LockKind {
            write: self.update.is_some(),
            delete: matches!(self.update, Some(Update::Delete)),
            trigger: self.trigger,
        }
    }

    pub(crate) fn lock_value(&self, primary: &PendingColumn, transactor: u64) -> LockValue {
        let kind = self.kind();
        LockValue {
            primary_row: primary.row.clone(),
            primary_column: primary.column.clone(),
            write: kind.write,
            delete: kind.delete,
            trigger: kind.trigger,
            transactor,
        }
    }
}

/// State carried between the commit phases of one transaction.
#[derive(Debug)]
pub struct CommitData {
    pub(crate) start_ts: u64,
    /// Sorted by row, then column.
    pub(crate) columns: Vec<PendingColumn>,
    pub(crate) primary: Option<usize>,
    /// Indexes of columns whose lock this transaction holds.
    pub(crate) locked: Vec<usize>,
}

impl CommitData {
    pub(crate) fn new(start_ts: u64, columns: Vec<PendingColumn>) -> Self {
        Self {
            start_ts,
            columns,
            primary: None,
            locked: Vec::new(),
        }
    }

    #[inline]
    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    /// Row and column of the primary, once chosen.
    pub fn primary(&self) -> Option<(&Bytes, &Column)> {
        self.primary
            .map(|idx| (&self.columns[idx].row, &self.columns[idx].column))
    }

    /// Number of columns the commit locks.
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub(crate) fn position(&self, row: &Bytes, column: &Column) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| &c.row == row && &c.column == column)
    }
}

/// Accepts the cells that forbid locking a column at `start_ts`: any lock,
/// any WRITE or DEL_LOCK committed after `start_ts`, and, for a trigger
/// column, any ACK newer than the notification being processed.
pub(crate) struct PrewriteFilter {
    pub start_ts: u64,
    pub ack_after: Option<u64>,
}

impl CellFilter for PrewriteFilter {
    fn accept(&self, cell: &Cell) -> bool {
        match decode_sort_key(cell.sort_key) {
            Ok((ColumnType::Lock, _)) => true,
            Ok((ColumnType::Write | ColumnType::DelLock, ts)) => ts > self.start_ts,
            Ok((ColumnType::Ack, ts)) => self.ack_after.map_or(false, |after| ts > after),
            Ok(_) => false,
            // Let corruption surface to the caller instead of writing over it.
            Err(_) => true,
        }
    }
}

/// Why a lock attempt was rejected.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// A newer WRITE or DEL_LOCK exists.
    Write,
    Acknowledged,
    /// Only locks stand in the way.
    Locked(Vec<Cell>),
}

pub(crate) fn classify_rejection(conflicts: Vec<Cell>) -> Result<Rejection, CodecError> {
    let mut acked = false;
    let mut locks = Vec::new();
    for cell in conflicts {
        match decode_sort_key(cell.sort_key)?.0 {
            ColumnType::Write | ColumnType::DelLock => return Ok(Rejection::Write),
            ColumnType::Ack => acked = true,
            ColumnType::Lock => locks.push(cell),
            _ => {}
        }
    }
    if acked {
        Ok(Rejection::Acknowledged)
    } else {
        Ok(Rejection::Locked(locks))
    }
}

/// Adds the mutations that commit a locked column at `commit_ts`.
///
/// A value write becomes a WRITE pointer; a delete or an acknowledgment-only
/// lock becomes a DEL_LOCK. A trigger column is acknowledged and its
/// notification up to `start_ts` removed. `notify` writes a notification at
/// `commit_ts` for a strongly observed column that received a value.
pub(crate) fn commit_column(
    m: &mut RowMutation,
    column: &Column,
    kind: LockKind,
    primary: bool,
    start_ts: u64,
    commit_ts: u64,
    notify: bool,
) -> Result<(), CodecError> {
    let stores_value = kind.write && !kind.delete;
    if stores_value {
        m.put(
            column,
            ColumnType::Write.encode(commit_ts)?,
            WriteValue::new(start_ts, primary).encode(),
        );
    } else {
        m.put(
            column,
            ColumnType::DelLock.encode(commit_ts)?,
            DelLockValue::new(start_ts, primary, kind.delete).encode(),
        );
    }
    m.delete(column, ColumnType::Lock.encode(start_ts)?);

    if kind.trigger {
        m.put(column, ColumnType::Ack.encode(start_ts)?, Bytes::empty());
        m.delete_up_to(&encode_notify_qualifier(column), start_ts);
    }
    if notify && stores_value {
        m.put(&encode_notify_qualifier(column), commit_ts, Bytes::empty());
    }
    Ok(())
}

/// Adds the mutations that remove a lock written at `start_ts` together with
/// the value it guarded.
pub(crate) fn rollback_column(
    m: &mut RowMutation,
    column: &Column,
    start_ts: u64,
) -> Result<(), CodecError> {
    m.delete(column, ColumnType::Lock.encode(start_ts)?);
    m.delete(column, ColumnType::Data.encode(start_ts)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_notify_qualifier, ACK_PREFIX};
    use crate::storage::MutationOp;

    fn cell(sort_key: u64) -> Cell {
        Cell::new(Bytes::from("r"), Column::new("f", "q"), sort_key, Bytes::empty())
    }

    #[test]
    fn test_prewrite_filter() {
        let filter = PrewriteFilter {
            start_ts: 10,
            ack_after: Some(5),
        };
        assert!(filter.accept(&cell(ColumnType::Lock.encode(3).unwrap())));
        assert!(filter.accept(&cell(ColumnType::Lock.encode(30).unwrap())));
        assert!(filter.accept(&cell(ColumnType::Write.encode(11).unwrap())));
        assert!(!filter.accept(&cell(ColumnType::Write.encode(10).unwrap())));
        assert!(filter.accept(&cell(ColumnType::DelLock.encode(12).unwrap())));
        assert!(filter.accept(&cell(ColumnType::Ack.encode(6).unwrap())));
        assert!(!filter.accept(&cell(ColumnType::Ack.encode(5).unwrap())));
        assert!(!filter.accept(&cell(ColumnType::Data.encode(20).unwrap())));
        assert!(!filter.accept(&cell(ColumnType::TxDone.encode(20).unwrap())));
        assert!(filter.accept(&cell(0x8000_0000_0000_0001)));

        let no_ack = PrewriteFilter {
            start_ts: 10,
            ack_after: None,
        };
        assert!(!no_ack.accept(&cell(ACK_PREFIX | 50)));
    }

    #[test]
    fn test_classify_rejection() {
        let write = cell(ColumnType::Write.encode(11).unwrap());
        let ack = cell(ColumnType::Ack.encode(11).unwrap());
        let lock = cell(ColumnType::Lock.encode(4).unwrap());

        assert_eq!(
            classify_rejection(vec![lock.clone(), ack.clone(), write]).unwrap(),
            Rejection::Write
        );
        assert_eq!(
            classify_rejection(vec![lock.clone(), ack]).unwrap(),
            Rejection::Acknowledged
        );
        assert_eq!(
            classify_rejection(vec![lock.clone()]).unwrap(),
            Rejection::Locked(vec![lock])
        );
    }

    #[test]
    fn test_commit_value_write() {
        let col = Column::new("f", "q");
        let mut m = RowMutation::new(Bytes::from("r"));
        let kind = LockKind {
            write: true,
            delete: false,
            trigger: false,
        };
        commit_column(&mut m, &col, kind, true, 5, 9, true).unwrap();

        assert_eq!(m.ops.len(), 3);
        assert_eq!(
            m.ops[0],
            MutationOp::Put {
                column: col.clone(),
                sort_key: ColumnType::Write.encode(9).unwrap(),
                value: WriteValue::new(5, true).encode(),
            }
        );
        assert_eq!(
            m.ops[1],
            MutationOp::Delete {
                column: col.clone(),
                sort_key: ColumnType::Lock.encode(5).unwrap(),
            }
        );
        match &m.ops[2] {
            MutationOp::Put {
                column, sort_key, ..
            } => {
                assert_eq!(decode_notify_qualifier(column).unwrap(), col);
                assert_eq!(*sort_key, 9);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_commit_delete_never_notifies() {
        let col = Column::new("f", "q");
        let mut m = RowMutation::new(Bytes::from("r"));
        let kind = LockKind {
            write: true,
            delete: true,
            trigger: false,
        };
        commit_column(&mut m, &col, kind, false, 5, 9, true).unwrap();

        assert_eq!(m.ops.len(), 2);
        assert_eq!(
            m.ops[0],
            MutationOp::Put {
                column: col,
                sort_key: ColumnType::DelLock.encode(9).unwrap(),
                value: DelLockValue::new(5, false, true).encode(),
            }
        );
    }

    #[test]
    fn test_commit_trigger_acknowledges() {
        let col = Column::new("attr", "lastupdate");
        let mut m = RowMutation::new(Bytes::from("url0000"));
        let kind = LockKind {
            write: false,
            delete: false,
            trigger: true,
        };
        commit_column(&mut m, &col, kind, true, 5, 9, true).unwrap();

        assert!(m.ops.contains(&MutationOp::Put {
            column: col.clone(),
            sort_key: ColumnType::DelLock.encode(9).unwrap(),
            value: DelLockValue::new(5, true, false).encode(),
        }));
        assert!(m.ops.contains(&MutationOp::Put {
            column: col.clone(),
            sort_key: ColumnType::Ack.encode(5).unwrap(),
            value: Bytes::empty(),
        }));
        assert!(m.ops.contains(&MutationOp::DeleteUpTo {
            column: encode_notify_qualifier(&col),
            sort_key: 5,
        }));
        // An acknowledgment lock carries no value, so nothing is re-notified.
        assert_eq!(m.ops.len(), 4);
    }

    #[test]
    fn test_rollback_column() {
        let col = Column::new("f", "q");
        let mut m = RowMutation::new(Bytes::from("r"));
        rollback_column(&mut m, &col, 7).unwrap();
        assert_eq!(
            m.ops,
            vec![
                MutationOp::Delete {
                    column: col.clone(),
                    sort_key: ColumnType::Lock.encode(7).unwrap(),
                },
                MutationOp::Delete {
                    column: col,
                    sort_key: ColumnType::Data.encode(7).unwrap(),
                },
            ]
        );
    }
}
