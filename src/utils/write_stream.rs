use crate::err::{SerializationError, SerializationResult};
use crate::utils::bytes;
use crate::utils::byte_cursor::Ambiguous64;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::io::{Cursor, Seek, SeekFrom, Write};

/// A seekable writer over a single owned buffer.
///
/// Seeking past the current end and writing zero-fills the gap, so callers can place records at
/// absolute offsets in any order.
#[derive(Debug, Default)]
pub struct WriteStream {
    inner: Cursor<Vec<u8>>,
}

#[inline]
fn io_err(what: &'static str) -> impl FnOnce(std::io::Error) -> SerializationError {
    move |source| SerializationError::Io { what, source }
}

impl WriteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of existing bytes, positioned at 0.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(buf),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.inner.position() as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.inner.set_position(pos as u64);
    }

    pub fn seek_end(&mut self) -> usize {
        // Seeking a `Cursor<Vec<u8>>` to its end is infallible.
        let end = self.len();
        self.inner.set_position(end as u64);
        end
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    /// Pad with zeros up to the next multiple of `alignment`.
    pub fn align_to(&mut self, alignment: usize) -> SerializationResult<()> {
        let pos = self.tell();
        let aligned = bytes::align_up(pos, alignment);
        if aligned > pos {
            self.write_zeros(aligned - pos, "alignment padding")?;
        }
        Ok(())
    }

    pub fn write_zeros(&mut self, n: usize, what: &'static str) -> SerializationResult<()> {
        const ZEROS: [u8; 16] = [0; 16];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(ZEROS.len());
            self.inner.write_all(&ZEROS[..chunk]).map_err(io_err(what))?;
            left -= chunk;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8], what: &'static str) -> SerializationResult<()> {
        self.inner.write_all(data).map_err(io_err(what))
    }

    pub fn write_u8(&mut self, v: u8) -> SerializationResult<()> {
        self.inner.write_u8(v).map_err(io_err("u8"))
    }

    pub fn write_u16(&mut self, v: u16) -> SerializationResult<()> {
        self.inner.write_u16::<LittleEndian>(v).map_err(io_err("u16"))
    }

    pub fn write_u32(&mut self, v: u32) -> SerializationResult<()> {
        self.inner.write_u32::<LittleEndian>(v).map_err(io_err("u32"))
    }

    pub fn write_u32_be(&mut self, v: u32) -> SerializationResult<()> {
        self.inner.write_u32::<BigEndian>(v).map_err(io_err("u32 (big-endian)"))
    }

    pub fn write_i32(&mut self, v: i32) -> SerializationResult<()> {
        self.inner.write_i32::<LittleEndian>(v).map_err(io_err("i32"))
    }

    pub fn write_u64(&mut self, v: u64) -> SerializationResult<()> {
        self.inner.write_u64::<LittleEndian>(v).map_err(io_err("u64"))
    }

    pub fn write_i64(&mut self, v: i64) -> SerializationResult<()> {
        self.inner.write_i64::<LittleEndian>(v).map_err(io_err("i64"))
    }

    pub fn write_f32(&mut self, v: f32) -> SerializationResult<()> {
        self.inner.write_f32::<LittleEndian>(v).map_err(io_err("f32"))
    }

    pub fn write_ambiguous_64(&mut self, v: Ambiguous64) -> SerializationResult<()> {
        match v {
            Ambiguous64::Signed(s) => self.write_i64(s),
            Ambiguous64::Unsigned(u) => self.write_u64(u),
        }
    }

    /// Overwrite a big-endian `u32` at `pos` without moving the current position.
    pub fn patch_u32_be(&mut self, pos: usize, v: u32) -> SerializationResult<()> {
        let saved = self.tell();
        self.inner
            .seek(SeekFrom::Start(pos as u64))
            .map_err(io_err("size patch"))?;
        self.write_u32_be(v)?;
        self.seek(saved);
        Ok(())
    }
}
