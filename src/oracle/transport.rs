// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Oracle transport abstraction.
//!
//! The client talks to the leader through an [`OracleConnection`] obtained
//! from an [`OracleConnector`]. Framing and sockets belong to the connector;
//! [`LocalConnector`] routes calls to servers in the same process and can
//! simulate unreachable servers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{OracleError, OracleServer};

/// An open connection to one oracle server.
pub trait OracleConnection: Send {
    /// Allocates `count` consecutive timestamps, returning the first.
    fn get_timestamps(&mut self, instance_id: &str, count: u64) -> Result<u64, OracleError>;
}

/// Opens connections to oracle servers by address.
pub trait OracleConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Box<dyn OracleConnection>, OracleError>;
}

/// Connects to [`OracleServer`]s running in this process.
#[derive(Default)]
pub struct LocalConnector {
    servers: RwLock<HashMap<String, Arc<OracleServer>>>,
    unreachable: Arc<RwLock<HashSet<String>>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a server reachable at its address.
    pub fn register(&self, server: Arc<OracleServer>) {
        self.servers
            .write()
            .insert(server.address().to_string(), server);
    }

    /// Simulates a network partition: connects to and calls on `address`
    /// fail with a transport error while `reachable` is false.
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self.unreachable.write();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }
}

impl OracleConnector for LocalConnector {
    fn connect(&self, address: &str) -> Result<Box<dyn OracleConnection>, OracleError> {
        if self.unreachable.read().contains(address) {
            return Err(OracleError::Transport(format!("{} unreachable", address)));
        }
        let server = self
            .servers
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| OracleError::Transport(format!("no oracle listening at {}", address)))?;
        Ok(Box::new(LocalConnection {
            server,
            unreachable: Arc::clone(&self.unreachable),
        }))
    }
}

struct LocalConnection {
    server: Arc<OracleServer>,
    unreachable: Arc<RwLock<HashSet<String>>>,
}

impl OracleConnection for LocalConnection {
    fn get_timestamps(&mut self, instance_id: &str, count: u64) -> Result<u64, OracleError> {
        if self.unreachable.read().contains(self.server.address()) {
            return Err(OracleError::Transport(format!(
                "connection to {} lost",
                self.server.address()
            )));
        }
        self.server.get_timestamps(instance_id, count)
    }
}
