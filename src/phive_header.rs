use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::utils::{ByteCursor, WriteStream};

use serde::Serialize;
use std::fmt;
use std::ops::Range;

pub const PHIVE_MAGIC: [u8; 6] = *b"Phive\0";

/// Blobs following the header start on this boundary.
pub const BLOB_ALIGNMENT: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileType {
    Shape = 0,
    NavMesh = 1,
    StaticCompound = 2,
    Cloth = 3,
}

impl FileType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FileType::Shape),
            1 => Some(FileType::NavMesh),
            2 => Some(FileType::StaticCompound),
            3 => Some(FileType::Cloth),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Shape => "shape",
            FileType::NavMesh => "navmesh",
            FileType::StaticCompound => "static compound",
            FileType::Cloth => "cloth",
        };
        f.write_str(name)
    }
}

/// The outer `Phive` header. It locates the tag file, the parameter blob and the file-end blob.
///
/// All fields are little-endian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhiveHeader {
    #[serde(skip)]
    pub magic: [u8; 6],
    pub reserve0: u8,
    pub reserve1: u8,
    pub byte_order_mark: u16,
    pub file_type: u8,
    pub max_section_capacity: u8,
    pub tagfile_offset: u32,
    pub param_offset: u32,
    pub file_end_offset: u32,
    pub tagfile_size: u32,
    pub param_size: u32,
    pub file_end_size: u32,
}

impl PhiveHeader {
    pub const SIZE: usize = 36;
    /// `SIZE` rounded up to [`BLOB_ALIGNMENT`].
    pub const PADDED_SIZE: usize = 48;

    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let magic = cursor.array::<6>("phive magic")?;
        if magic != PHIVE_MAGIC {
            return Err(DeserializationError::InvalidMagic {
                what: "phive header",
                expected: &PHIVE_MAGIC,
                found: magic.to_vec(),
            });
        }

        Ok(PhiveHeader {
            magic,
            reserve0: cursor.u8_named("reserve0")?,
            reserve1: cursor.u8_named("reserve1")?,
            byte_order_mark: cursor.u16_named("byte order mark")?,
            file_type: cursor.u8_named("file type")?,
            max_section_capacity: cursor.u8_named("max section capacity")?,
            tagfile_offset: cursor.u32_named("tagfile offset")?,
            param_offset: cursor.u32_named("param offset")?,
            file_end_offset: cursor.u32_named("file end offset")?,
            tagfile_size: cursor.u32_named("tagfile size")?,
            param_size: cursor.u32_named("param size")?,
            file_end_size: cursor.u32_named("file end size")?,
        })
    }

    /// Writes the header followed by zero padding up to the next 16-byte boundary.
    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.write_bytes(&self.magic, "phive magic")?;
        w.write_u8(self.reserve0)?;
        w.write_u8(self.reserve1)?;
        w.write_u16(self.byte_order_mark)?;
        w.write_u8(self.file_type)?;
        w.write_u8(self.max_section_capacity)?;
        for v in [
            self.tagfile_offset,
            self.param_offset,
            self.file_end_offset,
            self.tagfile_size,
            self.param_size,
            self.file_end_size,
        ] {
            w.write_u32(v)?;
        }
        w.align_to(BLOB_ALIGNMENT)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_u8(self.file_type)
    }

    fn range(
        offset: u32,
        size: u32,
        what: &'static str,
        len: usize,
    ) -> DeserializationResult<Range<usize>> {
        let start = offset as usize;
        match start.checked_add(size as usize) {
            Some(end) if end <= len => Ok(start..end),
            _ => Err(DeserializationError::OffsetOutOfRange {
                what,
                offset: i64::from(offset),
                len,
            }),
        }
    }

    /// Byte range of the tag file within a buffer of `len` bytes.
    pub fn tagfile_range(&self, len: usize) -> DeserializationResult<Range<usize>> {
        Self::range(self.tagfile_offset, self.tagfile_size, "tag file", len)
    }

    pub fn param_range(&self, len: usize) -> DeserializationResult<Range<usize>> {
        Self::range(self.param_offset, self.param_size, "parameter blob", len)
    }

    pub fn file_end_range(&self, len: usize) -> DeserializationResult<Range<usize>> {
        Self::range(self.file_end_offset, self.file_end_size, "file end blob", len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> PhiveHeader {
        PhiveHeader {
            magic: PHIVE_MAGIC,
            reserve0: 0,
            reserve1: 1,
            byte_order_mark: 0xFEFF,
            file_type: FileType::Cloth as u8,
            max_section_capacity: 4,
            tagfile_offset: 48,
            param_offset: 128,
            file_end_offset: 0,
            tagfile_size: 70,
            param_size: 16,
            file_end_size: 0,
        }
    }

    #[test]
    fn test_header_round_trip_is_padded() {
        let header = sample();
        let mut w = WriteStream::new();
        header.write(&mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), PhiveHeader::PADDED_SIZE);
        assert_eq!(&bytes[..6], b"Phive\0");
        assert_eq!(&bytes[PhiveHeader::SIZE..], &[0; 12]);

        let read = PhiveHeader::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(read, header);
        assert_eq!(read.file_type(), Some(FileType::Cloth));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = vec![0_u8; 48];
        bytes[..6].copy_from_slice(b"Phlve\0");
        assert!(matches!(
            PhiveHeader::read(&mut ByteCursor::new(&bytes)),
            Err(DeserializationError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_blob_ranges_are_checked() {
        let header = sample();
        assert_eq!(header.tagfile_range(200).unwrap(), 48..118);
        assert_eq!(header.file_end_range(200).unwrap(), 0..0);
        assert!(matches!(
            header.param_range(140),
            Err(DeserializationError::OffsetOutOfRange {
                what: "parameter blob",
                ..
            })
        ));
    }
}
