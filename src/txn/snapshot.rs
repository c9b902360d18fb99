// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Snapshot visibility over raw transactional cells.

use std::collections::{BTreeMap, HashMap};

use crate::codec::{decode_sort_key, ColumnType, DelLockValue, WriteValue, NOTIFY_FAMILY};
use crate::storage::{Bytes, Cell, Column, StorageError};

use super::TxnError;

/// What a snapshot sees in a span of cells.
#[derive(Debug, Default)]
pub(crate) struct SnapshotView {
    pub values: BTreeMap<(Bytes, Column), Bytes>,
    /// Locks at or below the snapshot that must be resolved before the
    /// columns holding them can be read.
    pub locks: Vec<Cell>,
}

/// Evaluates every column in `cells` (store order) at `start_ts`.
pub(crate) fn read_cells(cells: &[Cell], start_ts: u64) -> Result<SnapshotView, TxnError> {
    let mut view = SnapshotView::default();
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
        match read_column(column, start_ts)? {
            ColumnRead::Value(value) => {
                view.values
                    .insert((column[0].row.clone(), column[0].column.clone()), value);
            }
            ColumnRead::Absent => {}
            ColumnRead::Locked(locks) => view.locks.extend(locks),
        }
    }
    Ok(view)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ColumnRead {
    Value(Bytes),
    Absent,
    Locked(Vec<Cell>),
}

/// Evaluates the cells of one column at `start_ts`.
///
/// The newest WRITE or delete DEL_LOCK committed at or before `start_ts`
/// decides the value. Locks after `start_ts` belong to younger transactions
/// and are ignored; older ones make the column unreadable until resolved.
pub(crate) fn read_column(cells: &[Cell], start_ts: u64) -> Result<ColumnRead, TxnError> {
    let mut locks = Vec::new();
    let mut data: HashMap<u64, &Bytes> = HashMap::new();
    // Newest visible pointer: commit ts and the DATA start ts it names.
    let mut visible: Option<(u64, Option<u64>)> = None;

    for cell in cells {
        let (kind, ts) = decode_sort_key(cell.sort_key)?;
        match kind {
            ColumnType::Lock => {
                if ts <= start_ts {
                    locks.push(cell.clone());
                }
            }
            ColumnType::Data => {
                data.insert(ts, &cell.value);
            }
            ColumnType::Write => {
                let wv = WriteValue::decode(cell.value.as_bytes())?;
                check_truncated(wv.truncated, ts, start_ts)?;
                if ts <= start_ts && visible.map_or(true, |(newest, _)| ts > newest) {
                    visible = Some((ts, Some(wv.start_ts)));
                }
            }
            ColumnType::DelLock => {
                let dv = DelLockValue::decode(cell.value.as_bytes())?;
                check_truncated(dv.truncated, ts, start_ts)?;
                // A released acknowledgment lock says nothing about the value.
                if dv.delete && ts <= start_ts && visible.map_or(true, |(newest, _)| ts > newest) {
                    visible = Some((ts, None));
                }
            }
            ColumnType::Ack | ColumnType::TxDone => {}
        }
    }

    if !locks.is_empty() {
        return Ok(ColumnRead::Locked(locks));
    }

    match visible {
        Some((_, Some(data_ts))) => match data.get(&data_ts) {
            Some(value) => Ok(ColumnRead::Value((*value).clone())),
            None => Err(StorageError::Corruption(format!(
                "write pointer to missing data at {} in {}/{}",
                data_ts, cells[0].row, cells[0].column
            ))
            .into()),
        },
        _ => Ok(ColumnRead::Absent),
    }
}

/// Older versions behind a truncated pointer are gone; a snapshot below it
/// cannot be served.
fn check_truncated(truncated: bool, commit_ts: u64, start_ts: u64) -> Result<(), TxnError> {
    if truncated && commit_ts > start_ts {
        return Err(TxnError::StaleScan {
            start_ts,
            floor: commit_ts,
        });
    }
    Ok(())
}
