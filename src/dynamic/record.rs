//! The dynamic variant's one and only row shape: a numeric id plus two
//! signed 128-bit ordering keys and an opaque value. Every table holds
//! the same shape; what differs between tables is only which of the
//! three fixed orderings callers query by.

/// A row's position in every ordering is fixed at construction; the
/// order-preserving byte encoding below is what lets the secondary
/// orderings live in a plain `BTreeMap` (the same "encode so byte order
/// matches value order" idiom the typed `Index<T>` secondaries use).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: u32,
    pub primary: i128,
    pub secondary: i128,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(id: u32, primary: i128, secondary: i128, value: Vec<u8>) -> Record {
        Record {
            id,
            primary,
            secondary,
            value,
        }
    }
}

/// How a table's `primary`/`secondary` columns are meant to be compared.
/// Fixed the first time a table is created and immutable afterwards.
/// Purely informational: the three fixed orderings always compare
/// `primary`/`secondary` as plain `i128`s regardless of this tag, so it
/// has no effect on insert/remove/lookup behavior (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareMode {
    Integer,
    Unsigned,
    ByteString,
    Memory,
}

impl CompareMode {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            CompareMode::Integer => 0,
            CompareMode::Unsigned => 1,
            CompareMode::ByteString => 2,
            CompareMode::Memory => 3,
        }
    }

    pub(crate) fn from_u8(b: u8) -> CompareMode {
        match b {
            0 => CompareMode::Integer,
            1 => CompareMode::Unsigned,
            2 => CompareMode::ByteString,
            _ => CompareMode::Memory,
        }
    }
}

/// Flat encoding of a [`Record`] for the segment's bump allocator:
/// `id`, `primary`, `secondary` at fixed offsets, then the variable
/// length `value` prefixed by its own byte count.
pub(crate) fn encode_record(rec: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 16 + 16 + 4 + rec.value.len());
    buf.extend_from_slice(&rec.id.to_le_bytes());
    buf.extend_from_slice(&rec.primary.to_le_bytes());
    buf.extend_from_slice(&rec.secondary.to_le_bytes());
    buf.extend_from_slice(&(rec.value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&rec.value);
    buf
}

pub(crate) fn decode_record(buf: &[u8]) -> Record {
    let id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let primary = i128::from_le_bytes(buf[4..20].try_into().unwrap());
    let secondary = i128::from_le_bytes(buf[20..36].try_into().unwrap());
    let value_len = u32::from_le_bytes(buf[36..40].try_into().unwrap()) as usize;
    let value = buf[40..40 + value_len].to_vec();
    Record {
        id,
        primary,
        secondary,
        value,
    }
}

const SIGN_BIT: u128 = 1 << 127;

/// Order-preserving big-endian encoding of a signed 128-bit integer:
/// flipping the sign bit maps the signed range onto the unsigned range
/// without disturbing relative order, so plain byte comparison of the
/// result agrees with numeric comparison of the input.
pub(crate) fn encode_i128(v: i128) -> [u8; 16] {
    ((v as u128) ^ SIGN_BIT).to_be_bytes()
}

pub(crate) fn key_by_id(id: u32) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub(crate) fn key_by_primary_secondary(primary: i128, secondary: i128, id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&encode_i128(primary));
    key.extend_from_slice(&encode_i128(secondary));
    key.extend_from_slice(&id.to_be_bytes());
    key
}

pub(crate) fn key_by_secondary_primary(primary: i128, secondary: i128, id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&encode_i128(secondary));
    key.extend_from_slice(&encode_i128(primary));
    key.extend_from_slice(&id.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i128_encoding_preserves_order() {
        let mut values = vec![i128::MIN, -1, 0, 1, i128::MAX, -12345, 98765];
        let mut encoded: Vec<[u8; 16]> = values.iter().map(|&v| encode_i128(v)).collect();
        values.sort();
        encoded.sort();
        let re_encoded: Vec<[u8; 16]> = values.iter().map(|&v| encode_i128(v)).collect();
        assert_eq!(encoded, re_encoded);
    }
}
