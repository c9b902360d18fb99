// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction error types.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::coord::CoordinationError;
use crate::oracle::OracleError;
use crate::storage::{Bytes, Column, StorageError};

/// Errors that can occur in transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// A lock lost to a newer committed write or to a lock that could not be
    /// resolved. Retry the whole transaction from a fresh snapshot.
    #[error("commit conflict at {row}/{column}")]
    CommitConflict { row: Bytes, column: Column },

    /// The trigger column was already acknowledged by another transaction.
    #[error("notification {row}/{column} already acknowledged")]
    AlreadyAcknowledged { row: Bytes, column: Column },

    /// The snapshot is older than the oldest-active floor.
    #[error("stale scan: start timestamp {start_ts} is below floor {floor}")]
    StaleScan { start_ts: u64, floor: u64 },

    /// A commit protocol invariant was violated.
    #[error("fatal transaction error: {0}")]
    Fatal(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transaction already committed")]
    AlreadyCommitted,

    /// The transaction was closed, failed, or hit a stale scan.
    #[error("transaction is no longer usable")]
    Unusable,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TxnError {
    /// Returns true if running the transaction again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TxnError::CommitConflict { .. } => true,
            TxnError::Oracle(e) => matches!(e, OracleError::Timeout { .. }) || e.is_transient(),
            _ => false,
        }
    }

    /// Returns true for an oracle timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TxnError::Oracle(OracleError::Timeout { .. }))
    }
}
