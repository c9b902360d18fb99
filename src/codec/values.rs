// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Value encodings for LOCK, WRITE and DEL_LOCK cells, and the notification
//! column layout.

use crate::storage::{Bytes, Column};

use super::CodecError;

/// Family holding pending notifications.
pub const NOTIFY_FAMILY: &str = "ntfy";

const WRITE_PRIMARY: u8 = 0x01;
const WRITE_TRUNCATED: u8 = 0x02;

const DEL_PRIMARY: u8 = 0x01;
const DEL_DELETE: u8 = 0x02;
const DEL_TRUNCATED: u8 = 0x04;

const LOCK_WRITE: u8 = 0x01;
const LOCK_DELETE: u8 = 0x02;
const LOCK_TRIGGER: u8 = 0x04;

fn read_u64(bytes: &[u8], pos: usize, what: &'static str) -> Result<u64, CodecError> {
    let raw = bytes.get(pos..pos + 8).ok_or(CodecError::Truncated {
        what,
        needed: pos + 8,
        got: bytes.len(),
    })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_be_bytes(buf))
}

fn read_flags(bytes: &[u8], pos: usize, what: &'static str, known: u8) -> Result<u8, CodecError> {
    let flags = *bytes.get(pos).ok_or(CodecError::Truncated {
        what,
        needed: pos + 1,
        got: bytes.len(),
    })?;
    if flags & !known != 0 {
        return Err(CodecError::Corrupt {
            what,
            detail: format!("unknown flag bits {:#04x}", flags & !known),
        });
    }
    Ok(flags)
}

fn expect_len(bytes: &[u8], len: usize, what: &'static str) -> Result<(), CodecError> {
    if bytes.len() != len {
        return Err(CodecError::Corrupt {
            what,
            detail: format!("expected {} bytes, got {}", len, bytes.len()),
        });
    }
    Ok(())
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

fn read_field(bytes: &[u8], pos: usize, what: &'static str) -> Result<(Bytes, usize), CodecError> {
    let raw_len = bytes.get(pos..pos + 4).ok_or(CodecError::Truncated {
        what,
        needed: pos + 4,
        got: bytes.len(),
    })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(raw_len);
    let len = u32::from_be_bytes(buf) as usize;

    let start = pos + 4;
    let field = bytes.get(start..start + len).ok_or(CodecError::Truncated {
        what,
        needed: start + len,
        got: bytes.len(),
    })?;
    Ok((Bytes::from(field), start + len))
}

/// Payload of a WRITE cell: the start timestamp of the DATA cell it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteValue {
    pub start_ts: u64,
    pub primary: bool,
    /// Set by the version cleanup pass on the oldest pointer it keeps.
    pub truncated: bool,
}

impl WriteValue {
    pub const ENCODED_LEN: usize = 9;

    pub fn new(start_ts: u64, primary: bool) -> Self {
        Self {
            start_ts,
            primary,
            truncated: false,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.start_ts.to_be_bytes());
        let mut flags = 0;
        if self.primary {
            flags |= WRITE_PRIMARY;
        }
        if self.truncated {
            flags |= WRITE_TRUNCATED;
        }
        out.push(flags);
        Bytes::new(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let start_ts = read_u64(bytes, 0, "write value")?;
        let flags = read_flags(bytes, 8, "write value", WRITE_PRIMARY | WRITE_TRUNCATED)?;
        expect_len(bytes, Self::ENCODED_LEN, "write value")?;
        Ok(Self {
            start_ts,
            primary: flags & WRITE_PRIMARY != 0,
            truncated: flags & WRITE_TRUNCATED != 0,
        })
    }
}

/// Payload of a DEL_LOCK cell.
///
/// `delete == true` marks a committed delete of the column. `delete == false`
/// releases a lock that carried no value (the acknowledgment lock taken on a
/// trigger column), which readers skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelLockValue {
    pub start_ts: u64,
    pub primary: bool,
    pub delete: bool,
    pub truncated: bool,
}

impl DelLockValue {
    pub const ENCODED_LEN: usize = 9;

    pub fn new(start_ts: u64, primary: bool, delete: bool) -> Self {
        Self {
            start_ts,
            primary,
            delete,
            truncated: false,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.start_ts.to_be_bytes());
        let mut flags = 0;
        if self.primary {
            flags |= DEL_PRIMARY;
        }
        if self.delete {
            flags |= DEL_DELETE;
        }
        if self.truncated {
            flags |= DEL_TRUNCATED;
        }
        out.push(flags);
        Bytes::new(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let start_ts = read_u64(bytes, 0, "del-lock value")?;
        let flags = read_flags(
            bytes,
            8,
            "del-lock value",
            DEL_PRIMARY | DEL_DELETE | DEL_TRUNCATED,
        )?;
        expect_len(bytes, Self::ENCODED_LEN, "del-lock value")?;
        Ok(Self {
            start_ts,
            primary: flags & DEL_PRIMARY != 0,
            delete: flags & DEL_DELETE != 0,
            truncated: flags & DEL_TRUNCATED != 0,
        })
    }
}

/// Payload of a LOCK cell.
///
/// Layout: `[flags:u8][transactor:u64 BE]` followed by the primary row,
/// family, qualifier and visibility, each prefixed with a `u32` BE length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockValue {
    pub primary_row: Bytes,
    pub primary_column: Column,
    /// The lock guards a pending value (set or delete); false for an
    /// acknowledgment-only lock.
    pub write: bool,
    pub delete: bool,
    pub trigger: bool,
    /// Identity of the transactor holding the lock.
    pub transactor: u64,
}

impl LockValue {
    pub fn encode(&self) -> Bytes {
        let col = &self.primary_column;
        let mut out = Vec::with_capacity(
            9 + 16 + self.primary_row.len() + col.family.len() + col.qualifier.len() + col.visibility.len(),
        );

        let mut flags = 0;
        if self.write {
            flags |= LOCK_WRITE;
        }
        if self.delete {
            flags |= LOCK_DELETE;
        }
        if self.trigger {
            flags |= LOCK_TRIGGER;
        }
        out.push(flags);
        out.extend_from_slice(&self.transactor.to_be_bytes());
        push_field(&mut out, self.primary_row.as_bytes());
        push_field(&mut out, col.family.as_bytes());
        push_field(&mut out, col.qualifier.as_bytes());
        push_field(&mut out, col.visibility.as_bytes());
        Bytes::new(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let flags = read_flags(bytes, 0, "lock value", LOCK_WRITE | LOCK_DELETE | LOCK_TRIGGER)?;
        let transactor = read_u64(bytes, 1, "lock value")?;
        let (primary_row, pos) = read_field(bytes, 9, "lock value")?;
        let (family, pos) = read_field(bytes, pos, "lock value")?;
        let (qualifier, pos) = read_field(bytes, pos, "lock value")?;
        let (visibility, pos) = read_field(bytes, pos, "lock value")?;
        expect_len(bytes, pos, "lock value")?;

        Ok(Self {
            primary_row,
            primary_column: Column {
                family,
                qualifier,
                visibility,
            },
            write: flags & LOCK_WRITE != 0,
            delete: flags & LOCK_DELETE != 0,
            trigger: flags & LOCK_TRIGGER != 0,
            transactor,
        })
    }

    /// Returns true if this lock's primary is the given cell address.
    #[inline]
    pub fn is_primary(&self, row: &Bytes, column: &Column) -> bool {
        &self.primary_row == row && &self.primary_column == column
    }
}

/// Notification column for an observed column: family [`NOTIFY_FAMILY`],
/// qualifier `[len(family):u32 BE][family][qualifier]`, same visibility.
pub fn encode_notify_qualifier(column: &Column) -> Column {
    let mut qualifier = Vec::with_capacity(4 + column.family.len() + column.qualifier.len());
    push_field(&mut qualifier, column.family.as_bytes());
    qualifier.extend_from_slice(column.qualifier.as_bytes());
    Column {
        family: Bytes::from(NOTIFY_FAMILY),
        qualifier: Bytes::new(qualifier),
        visibility: column.visibility.clone(),
    }
}

/// Recovers the observed column from a notification column.
pub fn decode_notify_qualifier(notify_column: &Column) -> Result<Column, CodecError> {
    if notify_column.family.as_bytes() != NOTIFY_FAMILY.as_bytes() {
        return Err(CodecError::Corrupt {
            what: "notification column",
            detail: format!("family is {:?}", notify_column.family),
        });
    }
    let raw = notify_column.qualifier.as_bytes();
    let (family, pos) = read_field(raw, 0, "notification qualifier")?;
    Ok(Column {
        family,
        qualifier: Bytes::from(&raw[pos..]),
        visibility: notify_column.visibility.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lock() -> LockValue {
        LockValue {
            primary_row: Bytes::from("bob"),
            primary_column: Column::new("data", "balance").with_visibility("PUBLIC"),
            write: true,
            delete: false,
            trigger: true,
            transactor: 77,
        }
    }

    #[test]
    fn test_write_value_roundtrip() {
        let v = WriteValue::new(123, true);
        assert_eq!(WriteValue::decode(v.encode().as_bytes()).unwrap(), v);

        let t = WriteValue {
            truncated: true,
            ..WriteValue::new(9, false)
        };
        assert_eq!(WriteValue::decode(t.encode().as_bytes()).unwrap(), t);
    }

    #[test]
    fn test_del_lock_value_flags() {
        let v = DelLockValue::new(5, false, true);
        let decoded = DelLockValue::decode(v.encode().as_bytes()).unwrap();
        assert!(decoded.delete);
        assert!(!decoded.primary);
        assert!(!decoded.truncated);
    }

    #[test]
    fn test_lock_value_roundtrip() {
        let lock = sample_lock();
        let decoded = LockValue::decode(lock.encode().as_bytes()).unwrap();
        assert_eq!(decoded, lock);
        assert!(decoded.is_primary(&Bytes::from("bob"), &lock.primary_column));
        assert!(!decoded.is_primary(&Bytes::from("joe"), &lock.primary_column));
    }

    #[test]
    fn test_truncated_values_rejected() {
        let w = WriteValue::new(1, true).encode();
        assert!(matches!(
            WriteValue::decode(&w.as_bytes()[..5]),
            Err(CodecError::Truncated { .. })
        ));

        let l = sample_lock().encode();
        assert!(matches!(
            LockValue::decode(&l.as_bytes()[..l.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_and_flag_garbage_rejected() {
        let mut w = WriteValue::new(1, true).encode().0;
        w.push(0);
        assert!(matches!(WriteValue::decode(&w), Err(CodecError::Corrupt { .. })));

        let mut d = DelLockValue::new(1, true, true).encode().0;
        d[8] |= 0x80;
        assert!(matches!(DelLockValue::decode(&d), Err(CodecError::Corrupt { .. })));
    }

    #[test]
    fn test_notify_qualifier_is_unambiguous() {
        // "ab":"c" and "a":"bc" concatenate to the same bytes without a length.
        let x = encode_notify_qualifier(&Column::new("ab", "c"));
        let y = encode_notify_qualifier(&Column::new("a", "bc"));
        assert_ne!(x, y);
        assert_eq!(decode_notify_qualifier(&x).unwrap(), Column::new("ab", "c"));
        assert_eq!(decode_notify_qualifier(&y).unwrap(), Column::new("a", "bc"));
    }

    #[test]
    fn test_notify_column_keeps_visibility() {
        let col = Column::new("f", "q").with_visibility("A|B");
        let ntfy = encode_notify_qualifier(&col);
        assert_eq!(ntfy.family, Bytes::from(NOTIFY_FAMILY));
        assert_eq!(ntfy.visibility, Bytes::from("A|B"));
        assert_eq!(decode_notify_qualifier(&ntfy).unwrap(), col);
    }

    #[test]
    fn test_decode_notify_wrong_family() {
        assert!(decode_notify_qualifier(&Column::new("data", "x")).is_err());
    }
}
