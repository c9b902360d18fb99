// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Byte strings, columns, cells, spans and mutations.

use std::fmt;

/// Maximum row size in bytes.
pub const MAX_ROW_SIZE: usize = 8 * 1024; // 8KB

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// An owned byte string ordered lexicographically.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    /// Creates a new byte string.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns an empty byte string.
    #[inline]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy UTF-8 view, mostly useful in tests and log lines.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Bytes {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A column address within a row.
///
/// The visibility label is passed through to the store untouched.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub family: Bytes,
    pub qualifier: Bytes,
    pub visibility: Bytes,
}

impl Column {
    /// Creates a column with an empty visibility label.
    pub fn new(family: impl Into<Bytes>, qualifier: impl Into<Bytes>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
            visibility: Bytes::empty(),
        }
    }

    /// Sets the visibility label.
    pub fn with_visibility(mut self, visibility: impl Into<Bytes>) -> Self {
        self.visibility = visibility.into();
        self
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.qualifier)?;
        if !self.visibility.is_empty() {
            write!(f, "[{}]", self.visibility)?;
        }
        Ok(())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The unit the store physically holds.
///
/// `sort_key` carries a record kind in its top bits for transactional
/// families (see [`crate::codec`]) and a plain timestamp for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Bytes,
    pub column: Column,
    pub sort_key: u64,
    pub value: Bytes,
}

impl Cell {
    pub fn new(row: Bytes, column: Column, sort_key: u64, value: Bytes) -> Self {
        Self {
            row,
            column,
            sort_key,
            value,
        }
    }

    /// Returns true if this cell sits at the given row and column.
    #[inline]
    pub fn is_at(&self, row: &Bytes, column: &Column) -> bool {
        &self.row == row && &self.column == column
    }
}

/// A range of rows, optionally narrowed to a family or a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    /// Inclusive start row.
    pub start_row: Bytes,
    /// Exclusive end row, `None` for unbounded.
    pub end_row: Option<Bytes>,
    pub family: Option<Bytes>,
    pub column: Option<Column>,
}

impl Span {
    /// Every row in the store.
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows in `[start, end)`.
    pub fn rows(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start_row: start.into(),
            end_row: Some(end.into()),
            ..Self::default()
        }
    }

    /// A single row.
    pub fn row(row: impl Into<Bytes>) -> Self {
        let row = row.into();
        let end = row_successor(&row);
        Self {
            start_row: row,
            end_row: Some(end),
            ..Self::default()
        }
    }

    /// A single row restricted to one family.
    pub fn row_family(row: impl Into<Bytes>, family: impl Into<Bytes>) -> Self {
        Self {
            family: Some(family.into()),
            ..Self::row(row)
        }
    }

    /// A single column of a single row.
    pub fn exact(row: impl Into<Bytes>, column: &Column) -> Self {
        Self {
            column: Some(column.clone()),
            ..Self::row(row)
        }
    }

    /// Restricts any span to one family.
    pub fn with_family(mut self, family: impl Into<Bytes>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Returns true if the row falls inside this span's row range.
    pub fn contains_row(&self, row: &Bytes) -> bool {
        row >= &self.start_row && self.end_row.as_ref().map_or(true, |end| row < end)
    }

    /// Returns true if the column passes this span's family/column restriction.
    pub fn matches_column(&self, column: &Column) -> bool {
        if let Some(ref exact) = self.column {
            return exact == column;
        }
        if let Some(ref family) = self.family {
            return &column.family == family;
        }
        true
    }
}

/// Smallest row strictly greater than `row` (`row` followed by 0x00).
fn row_successor(row: &Bytes) -> Bytes {
    let mut next = row.0.clone();
    next.push(0);
    Bytes(next)
}

/// One change to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Put {
        column: Column,
        sort_key: u64,
        value: Bytes,
    },
    /// Removes a single cell.
    Delete { column: Column, sort_key: u64 },
    /// Removes every cell of the column whose sort key is `<= sort_key`.
    DeleteUpTo { column: Column, sort_key: u64 },
}

/// A set of changes applied atomically to a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    pub row: Bytes,
    pub ops: Vec<MutationOp>,
}

impl RowMutation {
    pub fn new(row: Bytes) -> Self {
        Self {
            row,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, column: &Column, sort_key: u64, value: impl Into<Bytes>) -> &mut Self {
        self.ops.push(MutationOp::Put {
            column: column.clone(),
            sort_key,
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, column: &Column, sort_key: u64) -> &mut Self {
        self.ops.push(MutationOp::Delete {
            column: column.clone(),
            sort_key,
        });
        self
    }

    pub fn delete_up_to(&mut self, column: &Column, sort_key: u64) -> &mut Self {
        self.ops.push(MutationOp::DeleteUpTo {
            column: column.clone(),
            sort_key,
        });
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
