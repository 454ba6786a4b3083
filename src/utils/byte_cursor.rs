use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::bytes;

use serde::Serialize;
use std::fmt;

/// A 64-bit value whose signedness is decided by its magnitude.
///
/// Relative pointers in the DATA section are stored as raw 64-bit words; a word with the top
/// bit set is a negative offset, anything else is read as unsigned. Both variants have the same
/// byte representation, so writing either one back reproduces the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Ambiguous64 {
    Unsigned(u64),
    Signed(i64),
}

impl Ambiguous64 {
    pub fn from_raw(raw: u64) -> Self {
        if raw & (1 << 63) != 0 {
            Ambiguous64::Signed(raw as i64)
        } else {
            Ambiguous64::Unsigned(raw)
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_raw(value as u64)
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        match self {
            Ambiguous64::Unsigned(v) => v as i64,
            Ambiguous64::Signed(v) => v,
        }
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.as_i64() as u64
    }

    pub fn is_null(self) -> bool {
        self.raw() == 0
    }
}

impl fmt::Display for Ambiguous64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ambiguous64::Unsigned(v) => write!(f, "{v:#x}"),
            Ambiguous64::Signed(v) => write!(f, "-{:#x}", v.unsigned_abs()),
        }
    }
}

/// A lightweight cursor over an immutable byte slice.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`: the data is already in memory and
/// every read is bounds-checked up front, failing with `TruncatedInput` instead of zero-filling.
///
/// All numeric reads are little-endian (except [`ByteCursor::u32_be`]) and advance the cursor on
/// success.
#[derive(Clone, Copy, Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        // Allow pos == len (EOF), reject pos > len.
        let _ = bytes::slice_r(buf, pos, 0, "cursor.position")?;
        Ok(Self { buf, pos })
    }

    #[inline]
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    #[inline]
    pub fn seek(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        let _ = bytes::slice_r(self.buf, pos, 0, what)?;
        self.pos = pos;
        Ok(())
    }

    /// Seek to `origin + relative`, failing when the target falls outside the buffer.
    pub fn seek_relative_to(
        &mut self,
        origin: usize,
        relative: i64,
        what: &'static str,
    ) -> DeserializationResult<()> {
        let target = (origin as i64).checked_add(relative);
        match target {
            Some(t) if t >= 0 && (t as usize) <= self.buf.len() => {
                self.pos = t as usize;
                Ok(())
            }
            _ => Err(DeserializationError::OffsetOutOfRange {
                what,
                offset: target.unwrap_or(i64::MAX),
                len: self.buf.len(),
            }),
        }
    }

    #[inline]
    pub fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let new_pos = self
            .pos
            .checked_add(n)
            .ok_or_else(|| bytes::truncated(what, self.pos, n, self.buf.len()))?;
        if new_pos > self.buf.len() {
            return Err(bytes::truncated(what, self.pos, n, self.buf.len()));
        }
        self.pos = new_pos;
        Ok(())
    }

    /// Advance to the next multiple of `alignment`. A cursor at position 0 never moves.
    pub fn align_to(&mut self, alignment: usize) -> DeserializationResult<()> {
        let aligned = bytes::align_up(self.pos, alignment);
        if aligned > self.buf.len() {
            return Err(bytes::truncated(
                "alignment padding",
                self.pos,
                aligned - self.pos,
                self.buf.len(),
            ));
        }
        self.pos = aligned;
        Ok(())
    }

    /// A cursor over the next `len` bytes only.
    ///
    /// Positions stay absolute (the returned cursor shares this cursor's origin), so errors raised
    /// while parsing a child section still report file offsets.
    pub fn bounded(&self, len: usize, what: &'static str) -> DeserializationResult<ByteCursor<'a>> {
        let _ = bytes::slice_r(self.buf, self.pos, len, what)?;
        Ok(ByteCursor {
            buf: &self.buf[..self.pos + len],
            pos: self.pos,
        })
    }

    #[inline]
    pub fn read_exact(&mut self, len: usize, what: &'static str) -> DeserializationResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.pos, len, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub fn array<const N: usize>(&mut self, what: &'static str) -> DeserializationResult<[u8; N]> {
        let v = bytes::read_array_r::<N>(self.buf, self.pos, what)?;
        self.pos += N;
        Ok(v)
    }

    #[inline]
    pub fn u8(&mut self) -> DeserializationResult<u8> {
        self.u8_named("u8")
    }

    #[inline]
    pub fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let b = bytes::read_u8(self.buf, self.pos)
            .ok_or_else(|| bytes::truncated(what, self.pos, 1, self.buf.len()))?;
        self.pos += 1;
        Ok(b)
    }

    #[inline]
    pub fn u16(&mut self) -> DeserializationResult<u16> {
        self.u16_named("u16")
    }

    #[inline]
    pub fn u16_named(&mut self, what: &'static str) -> DeserializationResult<u16> {
        let v = bytes::read_u16_le_r(self.buf, self.pos, what)?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub fn u32(&mut self) -> DeserializationResult<u32> {
        self.u32_named("u32")
    }

    #[inline]
    pub fn u32_named(&mut self, what: &'static str) -> DeserializationResult<u32> {
        let v = bytes::read_u32_le_r(self.buf, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub fn u32_be(&mut self, what: &'static str) -> DeserializationResult<u32> {
        let v = bytes::read_u32_be_r(self.buf, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub fn i32(&mut self) -> DeserializationResult<i32> {
        self.i32_named("i32")
    }

    #[inline]
    pub fn i32_named(&mut self, what: &'static str) -> DeserializationResult<i32> {
        Ok(self.u32_named(what)? as i32)
    }

    #[inline]
    pub fn u64(&mut self) -> DeserializationResult<u64> {
        self.u64_named("u64")
    }

    #[inline]
    pub fn u64_named(&mut self, what: &'static str) -> DeserializationResult<u64> {
        let v = bytes::read_u64_le_r(self.buf, self.pos, what)?;
        self.pos += 8;
        Ok(v)
    }

    #[inline]
    pub fn i64(&mut self) -> DeserializationResult<i64> {
        Ok(self.u64_named("i64")? as i64)
    }

    #[inline]
    pub fn f32(&mut self) -> DeserializationResult<f32> {
        Ok(f32::from_bits(self.u32_named("f32")?))
    }

    /// Read a 64-bit word, choosing signed or unsigned by its top bit.
    #[inline]
    pub fn ambiguous_64(&mut self, what: &'static str) -> DeserializationResult<Ambiguous64> {
        Ok(Ambiguous64::from_raw(self.u64_named(what)?))
    }

    /// Read a NUL-terminated ASCII string.
    ///
    /// A byte with the high bit set means this is not a string: the cursor is left where it
    /// started and `None` is returned. Running off the end of the buffer is `TruncatedInput`.
    pub fn c_string(&mut self, what: &'static str) -> DeserializationResult<Option<&'a str>> {
        let start = self.pos;
        let rest = &self.buf[start.min(self.buf.len())..];

        for (i, &b) in rest.iter().enumerate() {
            if b == 0 {
                let raw = &rest[..i];
                let s = std::str::from_utf8(raw).map_err(|_| {
                    DeserializationError::InvalidString {
                        what,
                        offset: start as u64,
                    }
                })?;
                self.pos = start + i + 1;
                return Ok(Some(s));
            }
            if b & 0x80 != 0 {
                return Ok(None);
            }
        }

        Err(bytes::truncated(what, start, rest.len() + 1, self.buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_64_selects_sign_by_magnitude() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&60_u64.to_le_bytes());
        buf.extend_from_slice(&(-24_i64).to_le_bytes());
        let mut cursor = ByteCursor::new(&buf);

        assert_eq!(
            cursor.ambiguous_64("ptr").unwrap(),
            Ambiguous64::Unsigned(60)
        );
        assert_eq!(cursor.ambiguous_64("ptr").unwrap(), Ambiguous64::Signed(-24));
        assert!(cursor.is_eof());
    }

    #[test]
    fn test_align_to_is_ignored_at_zero() {
        let buf = [0_u8; 16];
        let mut cursor = ByteCursor::new(&buf);
        cursor.align_to(8).unwrap();
        assert_eq!(cursor.tell(), 0);

        cursor.advance(3, "skip").unwrap();
        cursor.align_to(8).unwrap();
        assert_eq!(cursor.tell(), 8);
        cursor.align_to(8).unwrap();
        assert_eq!(cursor.tell(), 8);
    }

    #[test]
    fn test_align_past_end_fails() {
        let buf = [0_u8; 5];
        let mut cursor = ByteCursor::with_pos(&buf, 3).unwrap();
        assert!(cursor.align_to(8).is_err());
        assert_eq!(cursor.tell(), 3);
    }

    #[test]
    fn test_c_string_aborts_on_high_bit() {
        let buf = b"hkInt32\0\xFF\xFF\0";
        let mut cursor = ByteCursor::new(buf);
        assert_eq!(cursor.c_string("name").unwrap(), Some("hkInt32"));
        assert_eq!(cursor.tell(), 8);
        assert_eq!(cursor.c_string("name").unwrap(), None);
        assert_eq!(cursor.tell(), 8);
    }

    #[test]
    fn test_c_string_without_terminator_is_truncated() {
        let buf = b"abc";
        let mut cursor = ByteCursor::new(buf);
        assert!(matches!(
            cursor.c_string("name"),
            Err(DeserializationError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_read_exact_does_not_zero_fill() {
        let buf = [1_u8, 2, 3];
        let mut cursor = ByteCursor::new(&buf);
        assert!(cursor.read_exact(4, "payload").is_err());
        assert_eq!(cursor.read_exact(3, "payload").unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_bounded_keeps_absolute_positions() {
        let buf = [0_u8, 1, 2, 3, 4, 5, 6, 7];
        let mut outer = ByteCursor::with_pos(&buf, 2).unwrap();
        let mut inner = outer.bounded(3, "child").unwrap();
        assert_eq!(inner.tell(), 2);
        assert_eq!(inner.read_exact(3, "child").unwrap(), &[2, 3, 4]);
        assert!(inner.u8().is_err());

        assert!(outer.bounded(7, "child").is_err());
        outer.advance(3, "child").unwrap();
        assert_eq!(outer.u8().unwrap(), 5);
    }

    #[test]
    fn test_seek_relative_rejects_out_of_range_targets() {
        let buf = [0_u8; 16];
        let mut cursor = ByteCursor::new(&buf);
        cursor.seek_relative_to(8, -8, "target").unwrap();
        assert_eq!(cursor.tell(), 0);
        assert!(cursor.seek_relative_to(8, -9, "target").is_err());
        assert!(cursor.seek_relative_to(8, 9, "target").is_err());
    }
}
