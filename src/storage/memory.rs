// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory ordered cell store.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::{
    check_same_row, validate_mutation, Bytes, Cell, CellFilter, Column, Condition,
    ConditionalStatus, MutationOp, RowMutation, Span, StorageError, Store,
};

type CellKey = (Bytes, Column, Reverse<u64>);

/// A [`Store`] kept entirely in memory.
///
/// Cells are ordered by row, then column, then sort key descending, the
/// same order the persistent backend produces. A single `RwLock` guards the
/// map, which trivially gives per-row atomicity.
#[derive(Default)]
pub struct MemoryStore {
    cells: RwLock<BTreeMap<CellKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells currently held.
    pub fn len(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.read().is_empty()
    }

    fn column_cells(map: &BTreeMap<CellKey, Bytes>, row: &Bytes, column: &Column) -> Vec<Cell> {
        let start = (row.clone(), column.clone(), Reverse(u64::MAX));
        let end = (row.clone(), column.clone(), Reverse(0));
        map.range(start..=end)
            .map(|((r, c, Reverse(k)), v)| Cell::new(r.clone(), c.clone(), *k, v.clone()))
            .collect()
    }

    fn apply_locked(map: &mut BTreeMap<CellKey, Bytes>, mutation: RowMutation) {
        let row = mutation.row;
        for op in mutation.ops {
            match op {
                MutationOp::Put {
                    column,
                    sort_key,
                    value,
                } => {
                    map.insert((row.clone(), column, Reverse(sort_key)), value);
                }
                MutationOp::Delete { column, sort_key } => {
                    map.remove(&(row.clone(), column, Reverse(sort_key)));
                }
                MutationOp::DeleteUpTo { column, sort_key } => {
                    let start = (row.clone(), column.clone(), Reverse(sort_key));
                    let end = (row.clone(), column, Reverse(0));
                    let doomed: Vec<CellKey> =
                        map.range(start..=end).map(|(k, _)| k.clone()).collect();
                    for key in doomed {
                        map.remove(&key);
                    }
                }
            }
        }
    }
}

impl Store for MemoryStore {
    fn scan(&self, span: &Span, filter: Option<&dyn CellFilter>) -> Result<Vec<Cell>, StorageError> {
        let map = self.cells.read();
        let start = (span.start_row.clone(), Column::default(), Reverse(u64::MAX));

        let mut out = Vec::new();
        for ((row, column, Reverse(sort_key)), value) in
            map.range((Bound::Included(start), Bound::Unbounded))
        {
            if !span.contains_row(row) {
                break;
            }
            if !span.matches_column(column) {
                continue;
            }
            let cell = Cell::new(row.clone(), column.clone(), *sort_key, value.clone());
            if filter.map_or(true, |f| f.accept(&cell)) {
                out.push(cell);
            }
        }
        Ok(out)
    }

    fn apply(&self, mutation: RowMutation) -> Result<(), StorageError> {
        validate_mutation(&mutation)?;
        Self::apply_locked(&mut self.cells.write(), mutation);
        Ok(())
    }

    fn apply_if(
        &self,
        condition: &Condition<'_>,
        mutation: RowMutation,
    ) -> Result<ConditionalStatus, StorageError> {
        check_same_row(condition, &mutation)?;
        validate_mutation(&mutation)?;

        let mut map = self.cells.write();
        let current = Self::column_cells(&map, condition.row, condition.column);
        match condition.evaluate(&current) {
            Ok(()) => {
                Self::apply_locked(&mut map, mutation);
                Ok(ConditionalStatus::Accepted)
            }
            Err(conflicts) => Ok(ConditionalStatus::Rejected { conflicts }),
        }
    }
}
