// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Percolate: incremental-processing transactions over a Bigtable-style store
//!
//! This crate layers snapshot-isolated, cross-row transactions on a store
//! that only offers single-row atomicity, following the Percolator design:
//! a timestamp oracle orders transactions, locks and commit pointers live
//! next to the data, and observers run when the columns they watch change.

pub mod codec;
pub mod config;
pub mod coord;
pub mod env;
pub mod observer;
pub mod oracle;
pub mod storage;
pub mod txn;

pub use codec::{CodecError, ColumnType};
pub use config::{Config, ConfigError, ObserverConfig};
pub use coord::{CoordinationError, Coordinator, MemoryCoordinator};
pub use env::Environment;
pub use observer::{
    process_notification, scan_notifications, Notification, NotificationType, ObservedColumn,
    Observer, ObserverRegistry, Observers,
};
pub use oracle::{LocalConnector, OracleClient, OracleConnector, OracleError, OracleServer};
pub use storage::{
    collect_garbage, Bytes, Cell, Column, GcStats, MemoryStore, RocksStore, RowMutation, Span,
    StorageError, Store,
};
pub use txn::{Transaction, TxStats, TxStatus, TxnError};
