// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Timestamp oracle.
//!
//! The oracle hands out disjoint, strictly increasing 61-bit timestamps that
//! totally order all transactions. One [`OracleServer`] is elected leader
//! through the coordinator; every process talks to it through an
//! [`OracleClient`], which batches concurrent requests into one RPC and
//! follows leadership changes.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use percolate::config::Config;
//! use percolate::coord::{Coordinator, MemoryCoordinator};
//! use percolate::oracle::{LocalConnector, OracleClient, OracleConnector, OracleServer};
//!
//! let config = Config::default();
//! let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
//! let connector = Arc::new(LocalConnector::new());
//! connector.register(Arc::new(OracleServer::start("localhost:9913", coord.clone(), &config).unwrap()));
//!
//! let connector: Arc<dyn OracleConnector> = connector;
//! let client = OracleClient::start(&config, coord, connector).unwrap();
//! let a = client.get_timestamp().unwrap();
//! let b = client.get_timestamp().unwrap();
//! assert!(b > a);
//! ```

mod client;
mod error;
mod server;
mod signal;
mod transport;

pub use client::OracleClient;
pub use error::OracleError;
pub use server::OracleServer;
pub use transport::{LocalConnector, OracleConnection, OracleConnector};
