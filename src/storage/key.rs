// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Store key encoding and decoding.
//!
//! Encodes a cell address into a single byte key for the ordered backend.
//! Format: `[row][family][qualifier][visibility][MAX-sort_key:u64 BE]` where
//! each variable-length component is escaped (`0x00` becomes `0x00 0xFF`)
//! and terminated by `0x00 0x01`.
//!
//! The escaping keeps byte-order comparison of encoded keys identical to
//! lexicographic comparison of the components, so row ranges scan in row
//! order. The sort key is inverted (MAX - value) so that, within a column,
//! larger sort keys come first under the default byte-order comparator.

use super::{Bytes, Column, StorageError};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

fn push_escaped(out: &mut Vec<u8>, component: &[u8]) {
    for &b in component {
        if b == ESCAPE {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Reads one escaped component starting at `pos`, returning it and the
/// position just past its terminator.
fn read_escaped(encoded: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), StorageError> {
    let mut out = Vec::new();
    loop {
        let b = *encoded.get(pos).ok_or_else(|| {
            StorageError::InvalidKeyEncoding("unterminated key component".to_string())
        })?;
        if b != ESCAPE {
            out.push(b);
            pos += 1;
            continue;
        }
        match encoded.get(pos + 1) {
            Some(&ESCAPED_ZERO) => {
                out.push(ESCAPE);
                pos += 2;
            }
            Some(&TERMINATOR) => return Ok((out, pos + 2)),
            other => {
                return Err(StorageError::InvalidKeyEncoding(format!(
                    "bad escape sequence 0x00 {:?}",
                    other
                )))
            }
        }
    }
}

/// Encodes a cell address into a store key.
#[inline]
pub fn encode_store_key(row: &Bytes, column: &Column, sort_key: u64) -> Vec<u8> {
    let mut encoded = column_prefix(row, column);
    encoded.extend_from_slice(&(u64::MAX - sort_key).to_be_bytes());
    encoded
}

/// Decodes a store key back into row, column and sort key.
pub fn decode_store_key(encoded: &[u8]) -> Result<(Bytes, Column, u64), StorageError> {
    let (row, pos) = read_escaped(encoded, 0)?;
    let (family, pos) = read_escaped(encoded, pos)?;
    let (qualifier, pos) = read_escaped(encoded, pos)?;
    let (visibility, pos) = read_escaped(encoded, pos)?;

    let tail = &encoded[pos..];
    let inverted: [u8; 8] = tail.try_into().map_err(|_| {
        StorageError::InvalidKeyEncoding(format!("expected 8 sort key bytes, got {}", tail.len()))
    })?;

    let column = Column {
        family: Bytes::new(family),
        qualifier: Bytes::new(qualifier),
        visibility: Bytes::new(visibility),
    };
    Ok((Bytes::new(row), column, u64::MAX - u64::from_be_bytes(inverted)))
}

/// Returns the prefix shared by every cell of a row.
#[inline]
pub fn row_prefix(row: &Bytes) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(row.len() + 2);
    push_escaped(&mut prefix, row.as_bytes());
    prefix
}

/// Returns the prefix shared by every version of one column.
#[inline]
pub fn column_prefix(row: &Bytes, column: &Column) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(
        row.len() + column.family.len() + column.qualifier.len() + column.visibility.len() + 16,
    );
    push_escaped(&mut prefix, row.as_bytes());
    push_escaped(&mut prefix, column.family.as_bytes());
    push_escaped(&mut prefix, column.qualifier.as_bytes());
    push_escaped(&mut prefix, column.visibility.as_bytes());
    prefix
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_bytes() -> impl Strategy<Value = Bytes> {
        prop::collection::vec(any::<u8>(), 0..24).prop_map(Bytes::new)
    }

    proptest! {
        #[test]
        fn store_key_roundtrip(
            row in arb_bytes(),
            family in arb_bytes(),
            qualifier in arb_bytes(),
            visibility in arb_bytes(),
            sort_key in any::<u64>(),
        ) {
            let column = Column { family, qualifier, visibility };
            let encoded = encode_store_key(&row, &column, sort_key);
            let (r, c, k) = decode_store_key(&encoded).unwrap();

            prop_assert_eq!(r, row);
            prop_assert_eq!(c, column);
            prop_assert_eq!(k, sort_key);
        }

        #[test]
        fn encoded_order_matches_address_order(
            row_a in arb_bytes(),
            row_b in arb_bytes(),
            key_a in any::<u64>(),
            key_b in any::<u64>(),
        ) {
            let column = Column::new("f", "q");
            let enc_a = encode_store_key(&row_a, &column, key_a);
            let enc_b = encode_store_key(&row_b, &column, key_b);

            // rows ascending, then sort keys descending
            let expected = row_a.cmp(&row_b).then(key_b.cmp(&key_a));
            prop_assert_eq!(enc_a.cmp(&enc_b), expected);
        }
    }
}
