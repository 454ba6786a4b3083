//! Self-relative pointer primitives for walking a resolved DATA buffer.
//!
//! A pointer slot holds a 64-bit offset relative to the slot's own position; 0 is null. The
//! composite pointers (`StringPtr`, `RefVariant`, `RefPtr<T>`, `Array<T>`) are 8-byte aligned
//! and read their target without moving the caller's cursor past the slot.

use crate::err::{DeserializationResult, SerializationResult};
use crate::utils::{Ambiguous64, ByteCursor, WriteStream};

use log::warn;
use serde::Serialize;

pub const POINTER_ALIGNMENT: usize = 8;

/// A value that can be read from a DATA cursor.
pub trait Readable: Sized {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self>;
}

/// A value that can be written back to a DATA stream.
pub trait Writable {
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $read:ident, $write:ident);* $(;)?) => {
        $(
            impl Readable for $ty {
                #[inline]
                fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
                    cursor.$read()
                }
            }

            impl Writable for $ty {
                #[inline]
                fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
                    w.$write(*self)
                }
            }
        )*
    };
}

impl_scalar! {
    u8 => u8, write_u8;
    u16 => u16, write_u16;
    u32 => u32, write_u32;
    u64 => u64, write_u64;
    i32 => i32, write_i32;
    i64 => i64, write_i64;
    f32 => f32, write_f32;
}

/// A raw self-relative pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ptr {
    pub value: Ambiguous64,
    /// Position of the slot the value was read from.
    pub origin: usize,
}

impl Ptr {
    pub fn null(origin: usize) -> Self {
        Ptr {
            value: Ambiguous64::Unsigned(0),
            origin,
        }
    }

    /// A pointer stored at `origin` that points at `target`.
    pub fn to(origin: usize, target: usize) -> Self {
        Ptr {
            value: Ambiguous64::from_i64(target as i64 - origin as i64),
            origin,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Absolute target, or `None` for a null pointer.
    pub fn target(&self) -> Option<i64> {
        if self.is_null() {
            None
        } else {
            Some(self.origin as i64 + self.value.as_i64())
        }
    }

    /// Run `f` with `cursor` positioned at the target, then restore the cursor.
    fn visit<'a, T>(
        &self,
        cursor: &mut ByteCursor<'a>,
        what: &'static str,
        f: impl FnOnce(&mut ByteCursor<'a>) -> DeserializationResult<T>,
    ) -> DeserializationResult<Option<T>> {
        if self.is_null() {
            return Ok(None);
        }

        let saved = cursor.tell();
        cursor.seek_relative_to(self.origin, self.value.as_i64(), what)?;
        let out = f(cursor);
        cursor.seek(saved, what)?;
        out.map(Some)
    }
}

impl Readable for Ptr {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let origin = cursor.tell();
        let value = cursor.ambiguous_64("pointer")?;
        Ok(Ptr { value, origin })
    }
}

impl Writable for Ptr {
    /// Writes the pointer at the current position, keeping its absolute target. A pointer
    /// written back to the slot it was read from is written unchanged.
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        match self.target() {
            None => w.write_ambiguous_64(self.value),
            Some(target) => {
                w.write_ambiguous_64(Ambiguous64::from_i64(target - w.tell() as i64))
            }
        }
    }
}

/// Seek `w` to `at`, write `ptr` there, and restore the position.
fn write_ptr_at(w: &mut WriteStream, at: usize, ptr: &Ptr) -> SerializationResult<()> {
    let saved = w.tell();
    w.seek(at);
    ptr.write(w)?;
    w.seek(saved);
    Ok(())
}

/// `hkStringPtr`: a pointer to a NUL-terminated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringPtr {
    pub ptr: Ptr,
    pub value: Option<String>,
}

impl StringPtr {
    pub fn new(value: impl Into<String>) -> Self {
        StringPtr {
            ptr: Ptr::null(0),
            value: Some(value.into()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Writes the string bytes at the aligned end of the stream and points the slot at them.
    pub fn write_appended(&mut self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        let slot = w.tell();

        let Some(value) = self.value.as_deref() else {
            self.ptr = Ptr::null(slot);
            return self.ptr.write(w);
        };

        w.write_u64(0)?;
        let after = w.tell();

        w.seek_end();
        w.align_to(POINTER_ALIGNMENT)?;
        let target = w.tell();
        w.write_bytes(value.as_bytes(), "string")?;
        w.write_u8(0)?;

        self.ptr = Ptr::to(slot, target);
        write_ptr_at(w, slot, &self.ptr)?;
        w.seek(after);
        Ok(())
    }
}

impl Readable for StringPtr {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(POINTER_ALIGNMENT)?;
        let ptr = Ptr::read(cursor)?;
        let value = ptr
            .visit(cursor, "string pointer target", |c| {
                Ok(c.c_string("string")?.map(str::to_owned))
            })?
            .flatten();
        Ok(StringPtr { ptr, value })
    }
}

impl Writable for StringPtr {
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        self.ptr.write(w)
    }
}

/// `hkRefVariant`: a pointer to an object of a type not known statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefVariant {
    pub ptr: Ptr,
}

impl RefVariant {
    pub fn target(&self) -> Option<i64> {
        self.ptr.target()
    }
}

impl Readable for RefVariant {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(POINTER_ALIGNMENT)?;
        Ok(RefVariant {
            ptr: Ptr::read(cursor)?,
        })
    }
}

impl Writable for RefVariant {
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        self.ptr.write(w)
    }
}

/// `hkRefPtr<T>`: a pointer to a `T`, read eagerly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefPtr<T> {
    pub ptr: Ptr,
    pub value: Option<T>,
}

impl<T: Readable> Readable for RefPtr<T> {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(POINTER_ALIGNMENT)?;
        let ptr = Ptr::read(cursor)?;
        let value = ptr.visit(cursor, "reference pointer target", |c| T::read(c))?;
        Ok(RefPtr { ptr, value })
    }
}

impl<T: Writable> Writable for RefPtr<T> {
    /// Writes the slot and rewrites the target in place.
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        self.ptr.write(w)?;

        if let (Some(target), Some(value)) = (self.ptr.target(), &self.value) {
            let after = w.tell();
            w.seek(target as usize);
            value.write(w)?;
            w.seek(after);
        }
        Ok(())
    }
}

/// `hkArray<T>`: a pointer to `length` contiguous elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Array<T> {
    pub ptr: Ptr,
    pub length: i32,
    pub capacity_flags: i32,
    pub elements: Vec<T>,
}

/// Allocation flag bits kept in the top of `capacity_flags`.
const CAPACITY_FLAG_MASK: u32 = 0xC000_0000;

impl<T> Array<T> {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }
}

impl<T: Writable> Array<T> {
    /// Writes the header at the current (aligned) position and the elements at the aligned end
    /// of the stream. The base pointer, length and capacity are derived from where the elements
    /// land; the allocation flag bits of `capacity_flags` are kept.
    pub fn write_appended(&mut self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        let slot = w.tell();
        w.write_zeros(16, "array header")?;
        let after = w.tell();

        let len = self.elements.len();
        self.length = len as i32;
        self.capacity_flags =
            ((self.capacity_flags as u32 & CAPACITY_FLAG_MASK) | len as u32) as i32;

        self.ptr = if len == 0 {
            Ptr::null(slot)
        } else {
            w.seek_end();
            w.align_to(POINTER_ALIGNMENT)?;
            let base = w.tell();
            for element in &self.elements {
                element.write(w)?;
            }
            Ptr::to(slot, base)
        };

        w.seek(slot);
        self.ptr.write(w)?;
        w.write_i32(self.length)?;
        w.write_i32(self.capacity_flags)?;
        w.seek(after);
        Ok(())
    }
}

impl<T: Readable> Readable for Array<T> {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(POINTER_ALIGNMENT)?;
        let ptr = Ptr::read(cursor)?;
        let length = cursor.i32_named("array length")?;
        let capacity_flags = cursor.i32_named("array capacity")?;

        if length < 0 || (length > 0 && ptr.is_null()) {
            warn!(
                "array at {:#x} has length {length} with base {}; reading it as empty",
                ptr.origin, ptr.value
            );
            return Ok(Array {
                ptr,
                length,
                capacity_flags,
                elements: Vec::new(),
            });
        }

        let elements = ptr
            .visit(cursor, "array base", |c| {
                (0..length).map(|_| T::read(c)).collect()
            })?
            .unwrap_or_default();

        Ok(Array {
            ptr,
            length,
            capacity_flags,
            elements,
        })
    }
}

impl<T: Writable> Writable for Array<T> {
    /// Writes the header and rewrites the elements in place at the existing base.
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(POINTER_ALIGNMENT)?;
        self.ptr.write(w)?;
        w.write_i32(self.length)?;
        w.write_i32(self.capacity_flags)?;

        if let Some(base) = self.ptr.target() {
            let after = w.tell();
            w.seek(base as usize);
            for element in &self.elements {
                element.write(w)?;
            }
            w.seek(after);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn put_i64(buf: &mut [u8], at: usize, v: i64) {
        buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn put_i32(buf: &mut [u8], at: usize, v: i32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn test_string_ptr_reads_forward_and_backward() {
        let mut buf = vec![0_u8; 48];
        buf[0..6].copy_from_slice(b"first\0");
        put_i64(&mut buf, 16, -16);
        put_i64(&mut buf, 24, 8);
        buf[32..39].copy_from_slice(b"second\0");
        // slot at 40 is null

        let mut cursor = ByteCursor::with_pos(&buf, 16).unwrap();
        let a = StringPtr::read(&mut cursor).unwrap();
        let b = StringPtr::read(&mut cursor).unwrap();
        assert_eq!(a.as_str(), Some("first"));
        assert_eq!(b.as_str(), Some("second"));
        assert_eq!(cursor.tell(), 32);

        cursor.seek(40, "slot").unwrap();
        let c = StringPtr::read(&mut cursor).unwrap();
        assert_eq!(c.value, None);
        assert_eq!(cursor.tell(), 48);
    }

    #[test]
    fn test_string_ptr_aligns_before_reading() {
        let mut buf = vec![0_u8; 24];
        put_i64(&mut buf, 8, 8);
        buf[16..19].copy_from_slice(b"ok\0");

        let mut cursor = ByteCursor::with_pos(&buf, 3).unwrap();
        let s = StringPtr::read(&mut cursor).unwrap();
        assert_eq!(s.ptr.origin, 8);
        assert_eq!(s.as_str(), Some("ok"));
    }

    #[test]
    fn test_array_reads_elements_at_base() {
        let mut buf = vec![0_u8; 40];
        put_i64(&mut buf, 0, 24);
        put_i32(&mut buf, 8, 3);
        put_i32(&mut buf, 12, 3 | i32::MIN);
        put_i32(&mut buf, 24, 7);
        put_i32(&mut buf, 28, -1);
        put_i32(&mut buf, 32, 42);

        let mut cursor = ByteCursor::new(&buf);
        let array = Array::<i32>::read(&mut cursor).unwrap();
        assert_eq!(array.elements, vec![7, -1, 42]);
        assert_eq!(array.length, 3);
        assert_eq!(cursor.tell(), 16);
    }

    #[test]
    fn test_array_with_null_base_is_empty() {
        let mut buf = vec![0_u8; 16];
        put_i32(&mut buf, 8, 2);
        let array = Array::<u32>::read(&mut ByteCursor::new(&buf)).unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn test_array_base_out_of_range_fails() {
        let mut buf = vec![0_u8; 16];
        put_i64(&mut buf, 0, 64);
        put_i32(&mut buf, 8, 1);
        assert!(Array::<u32>::read(&mut ByteCursor::new(&buf)).is_err());
    }

    #[test]
    fn test_ref_ptr_reads_target_and_restores() {
        let mut buf = vec![0_u8; 24];
        put_i64(&mut buf, 8, -8);
        buf[0..4].copy_from_slice(&1.5_f32.to_le_bytes());

        let mut cursor = ByteCursor::with_pos(&buf, 8).unwrap();
        let r = RefPtr::<f32>::read(&mut cursor).unwrap();
        assert_eq!(r.value, Some(1.5));
        assert_eq!(cursor.tell(), 16);

        let v = RefVariant::read(&mut cursor).unwrap();
        assert_eq!(v.target(), None);
    }

    #[test]
    fn test_in_place_write_reproduces_input() {
        let mut buf = vec![0_u8; 40];
        put_i64(&mut buf, 0, 24);
        put_i32(&mut buf, 8, 2);
        put_i32(&mut buf, 12, 2);
        put_i32(&mut buf, 24, 5);
        put_i32(&mut buf, 28, 6);
        put_i64(&mut buf, 16, 16);
        buf[32..35].copy_from_slice(b"hi\0");

        let mut cursor = ByteCursor::new(&buf);
        let array = Array::<u32>::read(&mut cursor).unwrap();
        let s = StringPtr::read(&mut cursor).unwrap();

        let mut w = WriteStream::from_vec(buf.clone());
        array.write(&mut w).unwrap();
        s.write(&mut w).unwrap();
        assert_eq!(w.into_inner(), buf);
    }

    #[test]
    fn test_write_appended_derives_base_pointer() {
        let mut w = WriteStream::new();
        w.write_u32(0xAAAA_AAAA).unwrap();

        let mut array = Array {
            ptr: Ptr::null(0),
            length: 0,
            capacity_flags: i32::MIN,
            elements: vec![1_u32, 2, 3],
        };
        array.write_appended(&mut w).unwrap();
        assert_eq!(w.tell(), 24);

        let mut name = StringPtr::new("tail");
        name.write_appended(&mut w).unwrap();
        assert_eq!(w.tell(), 32);

        let out = w.into_inner();
        let mut cursor = ByteCursor::with_pos(&out, 4).unwrap();
        let read_back = Array::<u32>::read(&mut cursor).unwrap();
        assert_eq!(read_back.ptr.origin, 8);
        assert_eq!(read_back.elements, vec![1, 2, 3]);
        assert_eq!(read_back.capacity_flags, 3 | i32::MIN);

        let s = StringPtr::read(&mut cursor).unwrap();
        assert_eq!(s.as_str(), Some("tail"));
        assert_eq!(s.ptr.target(), Some(40));
    }

    #[test]
    fn test_ptr_write_keeps_absolute_target() {
        let ptr = Ptr::to(16, 64);
        let mut w = WriteStream::new();
        w.seek(32);
        ptr.write(&mut w).unwrap();
        let out = w.into_inner();
        assert_eq!(i64::from_le_bytes(out[32..40].try_into().unwrap()), 32);
    }
}
