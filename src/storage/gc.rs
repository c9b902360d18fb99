// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Version cleanup below the oldest-active floor.
//!
//! For each transactional column the pass keeps the newest value-determining
//! pointer (a WRITE, or a DEL_LOCK recording a delete) at or below the floor
//! and everything newer. The kept pointer is rewritten with its `truncated`
//! flag set, so a reader whose snapshot predates it can tell that older
//! versions are gone and fail with a stale-scan error instead of reading
//! nothing.
//!
//! LOCK cells and notification cells are never touched.
//!
//! A primary's WRITE or DEL_LOCK is only removed once a TX_DONE for its start
//! timestamp sits in the same column. Only the committing transaction writes
//! TX_DONE: a resolver rolling a secondary forward cannot tell whether other
//! secondaries are still locked, and those need the primary pointer to be
//! rolled forward rather than back. The pointer of a transaction whose owner
//! died after the primary commit is therefore retained.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::codec::{ColumnType, DelLockValue, WriteValue, NOTIFY_FAMILY};

use super::{Cell, Condition, RowMutation, Span, StorageError, Store};

/// Statistics from a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of cells scanned.
    pub cells_scanned: u64,
    /// Number of transactional columns visited.
    pub columns_visited: u64,
    /// Number of cells deleted.
    pub cells_deleted: u64,
    /// Number of pointers newly marked truncated.
    pub pointers_truncated: u64,
}

/// The pointer a column keeps as its oldest readable version.
struct KeptPointer<'a> {
    cell: &'a Cell,
    commit_ts: u64,
    start_ts: u64,
    already_truncated: bool,
    truncated_value: super::Bytes,
}

/// Runs one cleanup pass over the whole store.
///
/// `floor` is the oldest-active marker: no live transaction reads below it.
#[instrument(skip(store))]
pub fn collect_garbage(store: &dyn Store, floor: u64) -> Result<GcStats, StorageError> {
    let cells = store.scan(&Span::all(), None)?;
    let mut stats = GcStats {
        cells_scanned: cells.len() as u64,
        ..GcStats::default()
    };

    let mut start = 0;
    while start < cells.len() {
        let mut end = start + 1;
        while end < cells.len() && cells[end].is_at(&cells[start].row, &cells[start].column) {
            end += 1;
        }
        let column = &cells[start..end];
        start = end;

        if column[0].column.family.as_bytes() == NOTIFY_FAMILY.as_bytes() {
            continue;
        }
        stats.columns_visited += 1;
        collect_column(store, column, floor, &mut stats)?;
    }

    info!(
        floor,
        scanned = stats.cells_scanned,
        deleted = stats.cells_deleted,
        truncated = stats.pointers_truncated,
        "Version cleanup finished"
    );
    Ok(stats)
}

fn find_kept_pointer(column: &[Cell], floor: u64) -> Result<Option<KeptPointer<'_>>, StorageError> {
    // Pointers of both kinds, newest commit first.
    let mut pointers: Vec<(&Cell, ColumnType, u64)> = Vec::new();
    for cell in column {
        let (kind, ts) = crate::codec::decode_sort_key(cell.sort_key).map_err(corruption)?;
        if matches!(kind, ColumnType::Write | ColumnType::DelLock) && ts <= floor {
            pointers.push((cell, kind, ts));
        }
    }
    pointers.sort_by(|a, b| b.2.cmp(&a.2));

    for (cell, kind, commit_ts) in pointers {
        match kind {
            ColumnType::Write => {
                let wv = WriteValue::decode(cell.value.as_bytes()).map_err(corruption)?;
                let truncated = WriteValue {
                    truncated: true,
                    ..wv
                };
                return Ok(Some(KeptPointer {
                    cell,
                    commit_ts,
                    start_ts: wv.start_ts,
                    already_truncated: wv.truncated,
                    truncated_value: truncated.encode(),
                }));
            }
            _ => {
                let dv = DelLockValue::decode(cell.value.as_bytes()).map_err(corruption)?;
                if !dv.delete {
                    continue;
                }
                let truncated = DelLockValue {
                    truncated: true,
                    ..dv
                };
                return Ok(Some(KeptPointer {
                    cell,
                    commit_ts,
                    start_ts: dv.start_ts,
                    already_truncated: dv.truncated,
                    truncated_value: truncated.encode(),
                }));
            }
        }
    }
    Ok(None)
}

fn collect_column(
    store: &dyn Store,
    column: &[Cell],
    floor: u64,
    stats: &mut GcStats,
) -> Result<(), StorageError> {
    let kept = match find_kept_pointer(column, floor)? {
        Some(kept) => kept,
        None => return Ok(()),
    };
    let row = &kept.cell.row;
    let col = &kept.cell.column;

    if !kept.already_truncated {
        let condition = Condition::exists(row, col, kept.cell.sort_key, &kept.cell.value);
        let mut m = RowMutation::new(row.clone());
        m.put(col, kept.cell.sort_key, kept.truncated_value.clone());
        if !store.apply_if(&condition, m)?.is_accepted() {
            debug!(row = %row, column = %col, "Pointer changed during cleanup, skipping column");
            return Ok(());
        }
        stats.pointers_truncated += 1;
    }

    let locked: HashSet<u64> = column
        .iter()
        .filter(|c| ColumnType::Lock.matches(c.sort_key))
        .map(|c| crate::codec::timestamp_of(c.sort_key))
        .collect();
    // A primary pointer decides its transaction until TX_DONE shows every
    // secondary was committed.
    let done: HashSet<u64> = column
        .iter()
        .filter(|c| ColumnType::TxDone.matches(c.sort_key))
        .map(|c| crate::codec::timestamp_of(c.sort_key))
        .collect();

    let mut newest_ack_seen = false;
    let mut m = RowMutation::new(row.clone());
    for cell in column {
        if std::ptr::eq(cell, kept.cell) {
            continue;
        }
        let (kind, ts) = crate::codec::decode_sort_key(cell.sort_key).map_err(corruption)?;
        let doomed = match kind {
            ColumnType::Lock => false,
            ColumnType::Write => {
                let wv = WriteValue::decode(cell.value.as_bytes()).map_err(corruption)?;
                ts < kept.commit_ts && (!wv.primary || done.contains(&wv.start_ts))
            }
            ColumnType::DelLock => {
                let dv = DelLockValue::decode(cell.value.as_bytes()).map_err(corruption)?;
                (ts < kept.commit_ts || (ts <= floor && !dv.delete))
                    && (!dv.primary || done.contains(&dv.start_ts))
            }
            ColumnType::Data => ts < kept.start_ts && !locked.contains(&ts),
            ColumnType::TxDone => ts < kept.start_ts,
            ColumnType::Ack => {
                if ts > floor {
                    false
                } else if !newest_ack_seen {
                    newest_ack_seen = true;
                    false
                } else {
                    true
                }
            }
        };
        if doomed {
            m.delete(col, cell.sort_key);
        }
    }

    if !m.is_empty() {
        stats.cells_deleted += m.ops.len() as u64;
        store.apply(m)?;
    }
    Ok(())
}

fn corruption(e: crate::codec::CodecError) -> StorageError {
    StorageError::Corruption(e.to_string())
}
