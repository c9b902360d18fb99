// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

use super::Bytes;

/// Errors raised by a [`Store`](super::Store) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("row too large: {size} > {max}")]
    RowTooLarge { size: usize, max: usize },

    #[error("cell value too large: {size} > {max}")]
    ValueTooLarge { size: usize, max: usize },

    /// A conditional mutation must guard and mutate the same row.
    #[error("conditional mutation for row {condition:?} carries a mutation for row {mutation:?}")]
    RowMismatch { condition: Bytes, mutation: Bytes },

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("invalid store key: {0}")]
    InvalidKeyEncoding(String),
}
