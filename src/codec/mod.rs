// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cell codec for the transactional keyspace.
//!
//! Every transactional column multiplexes six record kinds into one ordered
//! run of cells. The top three bits of the 64-bit sort key carry the kind and
//! the low 61 bits a timestamp:
//!
//! | kind | prefix | timestamp | value |
//! |---|---|---|---|
//! | LOCK | `111` | start ts | [`LockValue`] |
//! | ACK | `110` | start ts | empty |
//! | DATA | `101` | start ts | user bytes |
//! | TX_DONE | `011` | start ts | empty |
//! | WRITE | `010` | commit ts | [`WriteValue`] |
//! | DEL_LOCK | `001` | commit ts | [`DelLockValue`] |
//!
//! Since the store orders a column's cells by sort key descending, a scan of
//! one column yields all LOCKs newest first, then all ACKs, then all DATA, and
//! so on. A single bounded scan therefore answers "is there a lock, and is
//! there a newer write" for the commit protocol.

mod error;
mod values;

pub use error::CodecError;
pub use values::{
    decode_notify_qualifier, encode_notify_qualifier, DelLockValue, LockValue, WriteValue,
    NOTIFY_FAMILY,
};

use crate::storage::{encode_store_key, Bytes, Column};

/// Mask selecting the record kind bits.
pub const PREFIX_MASK: u64 = 0xe000_0000_0000_0000;
/// Mask selecting the timestamp bits.
pub const TIMESTAMP_MASK: u64 = 0x1fff_ffff_ffff_ffff;

pub const LOCK_PREFIX: u64 = 0xe000_0000_0000_0000;
pub const ACK_PREFIX: u64 = 0xc000_0000_0000_0000;
pub const DATA_PREFIX: u64 = 0xa000_0000_0000_0000;
pub const TX_DONE_PREFIX: u64 = 0x6000_0000_0000_0000;
pub const WRITE_PREFIX: u64 = 0x4000_0000_0000_0000;
pub const DEL_LOCK_PREFIX: u64 = 0x2000_0000_0000_0000;

/// The logical record kind of a transactional cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Lock,
    Ack,
    Data,
    TxDone,
    Write,
    DelLock,
}

impl ColumnType {
    /// All kinds, in the order a column scan returns them.
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Lock,
        ColumnType::Ack,
        ColumnType::Data,
        ColumnType::TxDone,
        ColumnType::Write,
        ColumnType::DelLock,
    ];

    #[inline]
    pub const fn prefix(self) -> u64 {
        match self {
            ColumnType::Lock => LOCK_PREFIX,
            ColumnType::Ack => ACK_PREFIX,
            ColumnType::Data => DATA_PREFIX,
            ColumnType::TxDone => TX_DONE_PREFIX,
            ColumnType::Write => WRITE_PREFIX,
            ColumnType::DelLock => DEL_LOCK_PREFIX,
        }
    }

    /// Packs a timestamp into a sort key of this kind.
    #[inline]
    pub fn encode(self, ts: u64) -> Result<u64, CodecError> {
        if ts & !TIMESTAMP_MASK != 0 {
            return Err(CodecError::TimestampOutOfRange(ts));
        }
        Ok(self.prefix() | ts)
    }

    /// Reads the kind out of a sort key.
    pub fn from_sort_key(sort_key: u64) -> Result<ColumnType, CodecError> {
        match sort_key & PREFIX_MASK {
            LOCK_PREFIX => Ok(ColumnType::Lock),
            ACK_PREFIX => Ok(ColumnType::Ack),
            DATA_PREFIX => Ok(ColumnType::Data),
            TX_DONE_PREFIX => Ok(ColumnType::TxDone),
            WRITE_PREFIX => Ok(ColumnType::Write),
            DEL_LOCK_PREFIX => Ok(ColumnType::DelLock),
            _ => Err(CodecError::UnknownKind { sort_key }),
        }
    }

    /// Returns true if the sort key carries this kind. Unknown kinds never match.
    #[inline]
    pub fn matches(self, sort_key: u64) -> bool {
        sort_key & PREFIX_MASK == self.prefix()
    }

    /// Largest sort key of this kind, the first one a column scan meets.
    #[inline]
    pub const fn max_key(self) -> u64 {
        self.prefix() | TIMESTAMP_MASK
    }
}

/// Extracts the timestamp bits of a sort key.
#[inline]
pub fn timestamp_of(sort_key: u64) -> u64 {
    sort_key & TIMESTAMP_MASK
}

/// Splits a sort key into its kind and timestamp.
#[inline]
pub fn decode_sort_key(sort_key: u64) -> Result<(ColumnType, u64), CodecError> {
    Ok((ColumnType::from_sort_key(sort_key)?, timestamp_of(sort_key)))
}

/// Store key of a transactional record.
pub fn key_for(row: &Bytes, column: &Column, kind: ColumnType, ts: u64) -> Result<Vec<u8>, CodecError> {
    Ok(encode_store_key(row, column, kind.encode(ts)?))
}
