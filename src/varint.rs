//! Variable-width unsigned integers used by the TYPE section.
//!
//! The first byte carries a width selector in its high bits:
//!
//! | first byte  | extra bytes | payload bits in first byte |
//! |-------------|-------------|----------------------------|
//! | `0x00-0x7F` | 0           | 7                          |
//! | `0x80-0xBF` | 1           | 6                          |
//! | `0xC0-0xDF` | 2           | 5                          |
//! | `0xE0-0xE7` | 3           | 3                          |
//! | `0xE8-0xEF` | 4           | 3                          |
//! | `0xF0-0xF7` | 7           | 3                          |
//! | `0xF8-0xFF` | 13          | 3                          |
//!
//! The value is the big-endian concatenation of the payload bits and the extra bytes.

use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::utils::{ByteCursor, WriteStream};

use serde::Serialize;
use std::fmt;

/// A decoded variable-width integer together with the exact bytes it was read from.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VarUInt {
    #[serde(skip)]
    raw_bytes: Vec<u8>,
    value: u64,
}

/// `(extra bytes, payload mask)` for a first byte with its high bit set.
fn width_of(first: u8) -> (usize, u8) {
    match first >> 3 {
        0x10..=0x17 => (1, 0x3F),
        0x18..=0x1B => (2, 0x1F),
        0x1C => (3, 0x07),
        0x1D => (4, 0x07),
        0x1E => (7, 0x07),
        _ => (13, 0x07),
    }
}

impl VarUInt {
    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let start = cursor.position();
        let first = cursor.u8_named("varuint")?;

        if first & 0x80 == 0 {
            return Ok(VarUInt {
                raw_bytes: vec![first],
                value: u64::from(first),
            });
        }

        let (extra, mask) = width_of(first);
        let tail = cursor.read_exact(extra, "varuint extra bytes")?;

        let value = tail
            .iter()
            .fold(u128::from(first & mask), |acc, &b| (acc << 8) | u128::from(b));
        let value =
            u64::try_from(value).map_err(|_| DeserializationError::VarUIntOverflow { offset: start })?;

        let mut raw_bytes = Vec::with_capacity(extra + 1);
        raw_bytes.push(first);
        raw_bytes.extend_from_slice(tail);

        Ok(VarUInt { raw_bytes, value })
    }

    /// Build the shortest encoding of `value`.
    pub fn encode(value: u64) -> Self {
        let (extra, prefix): (usize, u8) = match value {
            v if v < 0x80 => (0, 0x00),
            v if v < 1 << 14 => (1, 0x80),
            v if v < 1 << 21 => (2, 0xC0),
            v if v < 1 << 27 => (3, 0xE0),
            v if v < 1 << 35 => (4, 0xE8),
            v if v < 1 << 59 => (7, 0xF0),
            _ => (13, 0xF8),
        };

        let wide = u128::from(value);
        let mut raw_bytes = Vec::with_capacity(extra + 1);
        raw_bytes.push(prefix | (wide >> (8 * extra)) as u8);
        for i in (0..extra).rev() {
            raw_bytes.push((wide >> (8 * i)) as u8);
        }

        VarUInt { raw_bytes, value }
    }

    /// Emit the bytes this value was read from (or encoded as).
    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.write_bytes(&self.raw_bytes, "varuint")
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    /// The value as a table index. Values that do not fit `usize` map to `usize::MAX`, which is
    /// never a valid index.
    #[inline]
    pub fn as_index(&self) -> usize {
        usize::try_from(self.value).unwrap_or(usize::MAX)
    }
}

impl Default for VarUInt {
    fn default() -> Self {
        VarUInt::encode(0)
    }
}

impl From<u64> for VarUInt {
    fn from(value: u64) -> Self {
        VarUInt::encode(value)
    }
}

impl fmt::Debug for VarUInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarUInt({})", self.value)
    }
}

impl fmt::Display for VarUInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
