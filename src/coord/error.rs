// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Coordination service error types.

/// Errors returned by a [`super::Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("unknown transactor {0}")]
    UnknownTransactor(u64),

    #[error("stale oracle reservation: expected {expected}, found {found}")]
    ReservationConflict { expected: u64, found: u64 },
}
