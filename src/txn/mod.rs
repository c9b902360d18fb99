// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cross-row snapshot transactions over a single-row-atomic store.
//!
//! A transaction reads at a start timestamp and writes at a commit
//! timestamp, both handed out by the timestamp oracle. Committing runs in
//! three phases:
//!
//! 1. **Lock.** Every written column gets a LOCK (and DATA for new values).
//!    One column is the primary; it is locked first and the other locks
//!    point at it. Locking fails on any newer write or foreign lock.
//! 2. **Commit primary.** Replacing the primary lock with a WRITE is the
//!    single atomic step that decides the transaction.
//! 3. **Finish.** The secondary locks are replaced, pending notifications
//!    are written and the primary is marked done.
//!
//! Readers that meet a lock look at its primary to roll the column forward
//! or back. A live transactor's lock is respected until it times out.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use percolate::config::Config;
//! use percolate::coord::{Coordinator, MemoryCoordinator};
//! use percolate::env::Environment;
//! use percolate::observer::ObserverRegistry;
//! use percolate::oracle::{LocalConnector, OracleServer};
//! use percolate::storage::{Column, MemoryStore};
//! use percolate::txn::Transaction;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let coordinator: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
//! let connector = Arc::new(LocalConnector::new());
//! let server = Arc::new(OracleServer::start("oracle-1", Arc::clone(&coordinator), &config)?);
//! connector.register(server);
//!
//! let env = Arc::new(Environment::new(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     coordinator,
//!     connector,
//!     &ObserverRegistry::new(),
//! )?);
//!
//! let balance = Column::new("acct", "balance");
//! let mut tx = Transaction::new(&env);
//! tx.set("bob", &balance, "10")?;
//! tx.commit()?;
//!
//! let mut tx = Transaction::new(&env);
//! assert_eq!(tx.get("bob", &balance)?, Some("10".into()));
//! # Ok(())
//! # }
//! ```

mod commit;
mod error;
mod resolver;
mod snapshot;
mod stats;
mod tracker;
mod transaction;
mod transactor;

#[cfg(test)]
mod tests;

pub use commit::{CommitData, Update};
pub use error::TxnError;
pub use stats::TxStats;
pub use tracker::{advance_oldest_active, TimestampTracker};
pub use transaction::{Transaction, TxStatus};
pub use transactor::{TransactorCache, TransactorNode};
