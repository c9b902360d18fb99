// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Oracle error types.

use crate::coord::CoordinationError;

/// Errors from the oracle server, its transport, and the oracle client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// No timestamp arrived within the configured wait.
    #[error("timed out after {after_ms}ms waiting for a timestamp")]
    Timeout { after_ms: u64 },

    /// The client was closed before the request was served.
    #[error("oracle client closed")]
    Closed,

    /// The contacted server is not the elected leader.
    #[error("oracle {server} is not the leader")]
    NotLeader { server: String },

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("invalid timestamp request: {0}")]
    InvalidRequest(String),

    /// The 61-bit timestamp space is used up.
    #[error("oracle timestamp space exhausted")]
    Exhausted,

    #[error("failed to spawn oracle worker: {0}")]
    Spawn(String),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

impl OracleError {
    /// Errors the client worker absorbs by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::NotLeader { .. } | OracleError::Transport(_) | OracleError::Coordination(_)
        )
    }
}
