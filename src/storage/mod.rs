// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Ordered, sparse cell store abstraction.
//!
//! The transaction layer sits on top of a Bigtable-style store that only
//! guarantees single-row atomicity. This module defines what it needs from
//! such a store:
//!
//! - ordered range scans over `(row, column, sort key)` with newest sort key
//!   first inside a column,
//! - a server-side predicate ([`CellFilter`]) applied during scans and
//!   conditional mutations,
//! - atomic conditional mutation of a single row ([`Store::apply_if`]).
//!
//! Two backends are provided: [`MemoryStore`] for embedding and tests, and
//! [`RocksStore`] for a persistent single-node deployment.
//!
//! # Example
//!
//! ```
//! use percolate::storage::{Bytes, Column, MemoryStore, RowMutation, Span, Store};
//!
//! let store = MemoryStore::new();
//! let col = Column::new("fam", "qual");
//!
//! let mut m = RowMutation::new(Bytes::from("row1"));
//! m.put(&col, 42, "hello");
//! store.apply(m).unwrap();
//!
//! let cells = store.scan(&Span::exact("row1", &col), None).unwrap();
//! assert_eq!(cells.len(), 1);
//! assert_eq!(cells[0].value, Bytes::from("hello"));
//! ```

mod error;
mod gc;
mod key;
mod memory;
mod rocks;
mod types;

pub use error::StorageError;
pub use gc::{collect_garbage, GcStats};
pub use key::{column_prefix, decode_store_key, encode_store_key, row_prefix};
pub use memory::MemoryStore;
pub use rocks::{DurabilityMode, RocksStore};
pub use types::{
    Bytes, Cell, Column, MutationOp, RowMutation, Span, MAX_ROW_SIZE, MAX_VALUE_SIZE,
};

/// Server-side predicate evaluated against individual cells.
pub trait CellFilter: Send + Sync {
    /// Returns true if the cell should be returned (scans) or counts as a
    /// match (conditions).
    fn accept(&self, cell: &Cell) -> bool;
}

impl<F> CellFilter for F
where
    F: Fn(&Cell) -> bool + Send + Sync,
{
    fn accept(&self, cell: &Cell) -> bool {
        self(cell)
    }
}

/// What must hold for one column before a conditional mutation applies.
#[derive(Clone, Copy)]
pub enum Check<'a> {
    /// No cell of the column is accepted by the filter.
    NoneMatch(&'a dyn CellFilter),
    /// A cell with exactly this sort key and value is present.
    Exists { sort_key: u64, value: &'a Bytes },
}

/// A single-column condition guarding a row mutation.
#[derive(Clone, Copy)]
pub struct Condition<'a> {
    pub row: &'a Bytes,
    pub column: &'a Column,
    pub check: Check<'a>,
}

impl<'a> Condition<'a> {
    pub fn none_match(row: &'a Bytes, column: &'a Column, filter: &'a dyn CellFilter) -> Self {
        Self {
            row,
            column,
            check: Check::NoneMatch(filter),
        }
    }

    pub fn exists(row: &'a Bytes, column: &'a Column, sort_key: u64, value: &'a Bytes) -> Self {
        Self {
            row,
            column,
            check: Check::Exists { sort_key, value },
        }
    }

    /// Evaluates the condition against the current cells of its column.
    ///
    /// Returns the offending cells on failure. For `Exists` the offending
    /// cells are whatever sits at the requested sort key (possibly nothing).
    pub fn evaluate(&self, column_cells: &[Cell]) -> Result<(), Vec<Cell>> {
        match self.check {
            Check::NoneMatch(filter) => {
                let matched: Vec<Cell> = column_cells
                    .iter()
                    .filter(|c| filter.accept(c))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    Ok(())
                } else {
                    Err(matched)
                }
            }
            Check::Exists { sort_key, value } => {
                let found: Vec<Cell> = column_cells
                    .iter()
                    .filter(|c| c.sort_key == sort_key)
                    .cloned()
                    .collect();
                if found.iter().any(|c| &c.value == value) {
                    Ok(())
                } else {
                    Err(found)
                }
            }
        }
    }
}

/// Outcome of a conditional mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalStatus {
    Accepted,
    Rejected { conflicts: Vec<Cell> },
}

impl ConditionalStatus {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConditionalStatus::Accepted)
    }
}

/// The ordered cell store.
///
/// Implementations must give per-row atomicity for [`Store::apply`] and
/// [`Store::apply_if`]; nothing is assumed across rows.
pub trait Store: Send + Sync {
    /// Returns the cells inside the span accepted by the optional filter, in
    /// store order: rows and columns ascending, sort keys descending.
    fn scan(&self, span: &Span, filter: Option<&dyn CellFilter>) -> Result<Vec<Cell>, StorageError>;

    /// Applies a row mutation unconditionally.
    fn apply(&self, mutation: RowMutation) -> Result<(), StorageError>;

    /// Applies a row mutation if the condition holds, atomically with respect
    /// to every other mutation of the same row.
    fn apply_if(
        &self,
        condition: &Condition<'_>,
        mutation: RowMutation,
    ) -> Result<ConditionalStatus, StorageError>;
}

fn validate_mutation(mutation: &RowMutation) -> Result<(), StorageError> {
    if mutation.row.len() > MAX_ROW_SIZE {
        return Err(StorageError::RowTooLarge {
            size: mutation.row.len(),
            max: MAX_ROW_SIZE,
        });
    }
    for op in &mutation.ops {
        if let MutationOp::Put { value, .. } = op {
            if value.len() > MAX_VALUE_SIZE {
                return Err(StorageError::ValueTooLarge {
                    size: value.len(),
                    max: MAX_VALUE_SIZE,
                });
            }
        }
    }
    Ok(())
}

fn check_same_row(condition: &Condition<'_>, mutation: &RowMutation) -> Result<(), StorageError> {
    if condition.row != &mutation.row {
        return Err(StorageError::RowMismatch {
            condition: condition.row.clone(),
            mutation: mutation.row.clone(),
        });
    }
    Ok(())
}
