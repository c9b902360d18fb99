// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Codec error types.

/// Errors raised while decoding transactional cells.
///
/// Every variant means the store holds bytes this layer did not write, so
/// callers treat them as data corruption rather than as conflicts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown record kind in sort key {sort_key:#018x}")]
    UnknownKind { sort_key: u64 },

    #[error("timestamp {0} does not fit in 61 bits")]
    TimestampOutOfRange(u64),

    #[error("truncated {what}: need {needed} bytes, got {got}")]
    Truncated {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("corrupt {what}: {detail}")]
    Corrupt { what: &'static str, detail: String },
}
