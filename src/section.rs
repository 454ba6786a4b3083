//! Tagged-section framing.
//!
//! Every section starts with an 8-byte header:
//!
//! - `Size` (u32, big-endian): top 2 bits are a chunk flag, the low 30 bits the section length
//!   including the header itself.
//! - `signature` (4 ASCII bytes).
//!
//! The tag-file root (`TAG0`) contains `SDKV`, `DATA`, `TYPE` and `INDX`; `TYPE` and `INDX` are
//! themselves composites whose children use the same framing.

use crate::err::{
    DeserializationError, DeserializationResult, SerializationError, SerializationResult,
};
use crate::index_section::IndexSection;
use crate::type_section::TypeSection;
use crate::utils::{ByteCursor, WriteStream};

use log::{debug, trace};
use serde::{Serialize, Serializer};
use std::fmt;

/// The only SDK version this crate accepts in strict mode.
pub const SDK_VERSION: &str = "20220100";

pub const SECTION_HEADER_LEN: usize = 8;

const SIZE_MASK: u32 = 0x3FFF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    pub const TAG0: Signature = Signature(*b"TAG0");
    pub const SDKV: Signature = Signature(*b"SDKV");
    pub const DATA: Signature = Signature(*b"DATA");
    pub const TYPE: Signature = Signature(*b"TYPE");
    pub const INDX: Signature = Signature(*b"INDX");
    pub const ITEM: Signature = Signature(*b"ITEM");
    pub const PTCH: Signature = Signature(*b"PTCH");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(\"{self}\")")
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Packed section length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    chunk_flag: u8,
    size: u32,
}

impl Size {
    /// Values outside the 2-bit/30-bit ranges are masked.
    pub fn new(chunk_flag: u8, size: u32) -> Self {
        Size {
            chunk_flag: chunk_flag & 0b11,
            size: size & SIZE_MASK,
        }
    }

    /// A size for `len` written bytes, keeping `chunk_flag`.
    pub fn for_len(chunk_flag: u8, len: usize, what: &'static str) -> SerializationResult<Self> {
        match u32::try_from(len) {
            Ok(size) if size <= SIZE_MASK => Ok(Size::new(chunk_flag, size)),
            _ => Err(SerializationError::SizeOverflow { what, size: len }),
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        Size {
            chunk_flag: (raw >> 30) as u8,
            size: raw & SIZE_MASK,
        }
    }

    pub fn to_raw(self) -> u32 {
        (u32::from(self.chunk_flag) << 30) | self.size
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        Ok(Size::from_raw(cursor.u32_be("section size")?))
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.write_u32_be(self.to_raw())
    }

    #[inline]
    pub fn chunk_flag(&self) -> u8 {
        self.chunk_flag
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionHeader {
    pub size: Size,
    pub signature: Signature,
    /// Absolute offset of the header in the buffer it was read from.
    #[serde(skip)]
    pub offset: u64,
}

impl SectionHeader {
    /// Reads the header and checks that the declared size covers at least the header and that
    /// the payload lies within `cursor`'s buffer.
    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let offset = cursor.position();
        let size = Size::read(cursor)?;
        let signature = Signature(cursor.array::<4>("section signature")?);

        let header = SectionHeader {
            size,
            signature,
            offset,
        };

        if (size.size() as usize) < SECTION_HEADER_LEN {
            return Err(DeserializationError::InvalidSectionSize {
                signature,
                offset,
                size: size.size(),
            });
        }

        if header.payload_len() > cursor.remaining() {
            return Err(crate::utils::bytes::truncated(
                "section payload",
                cursor.tell(),
                header.payload_len(),
                cursor.buf().len(),
            ));
        }

        trace!(
            "section {} at offset {} ({} bytes, chunk flag {})",
            signature,
            offset,
            size.size(),
            size.chunk_flag()
        );

        Ok(header)
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.size.size() as usize).saturating_sub(SECTION_HEADER_LEN)
    }

    #[inline]
    pub fn payload_offset(&self) -> u64 {
        self.offset + SECTION_HEADER_LEN as u64
    }
}

/// Writes a section header, the body produced by `body`, then patches the size to the number of
/// bytes actually written. The stored chunk flag is kept.
pub(crate) fn write_section<F>(
    w: &mut WriteStream,
    header: &SectionHeader,
    body: F,
) -> SerializationResult<()>
where
    F: FnOnce(&mut WriteStream) -> SerializationResult<()>,
{
    let start = w.tell();
    w.write_u32_be(0)?;
    w.write_bytes(header.signature.as_bytes(), "section signature")?;
    body(w)?;

    let written = w.tell() - start;
    let size = Size::for_len(header.size.chunk_flag(), written, "section")?;
    w.patch_u32_be(start, size.to_raw())
}

/// `SDKV`: the SDK version string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SdkVersionSection {
    pub header: SectionHeader,
    pub version: String,
}

impl SdkVersionSection {
    fn parse(header: SectionHeader, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let raw = payload.read_exact(header.payload_len(), "SDKV version")?;
        if !raw.is_ascii() {
            return Err(DeserializationError::InvalidString {
                what: "SDKV version",
                offset: header.payload_offset(),
            });
        }
        // `is_ascii` guarantees valid UTF-8.
        let version = String::from_utf8_lossy(raw).into_owned();

        Ok(SdkVersionSection { header, version })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            w.write_bytes(self.version.as_bytes(), "SDKV version")
        })
    }
}

/// `DATA`: the stored object graph, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSection {
    pub header: SectionHeader,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl DataSection {
    fn parse(header: SectionHeader, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let data = payload.read_exact(header.payload_len(), "DATA payload")?.to_vec();
        Ok(DataSection { header, data })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| w.write_bytes(&self.data, "DATA payload"))
    }
}

/// A direct child of `TAG0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TagSection {
    SdkVersion(SdkVersionSection),
    Data(DataSection),
    Type(TypeSection),
    Index(IndexSection),
}

impl TagSection {
    pub fn header(&self) -> &SectionHeader {
        match self {
            TagSection::SdkVersion(s) => &s.header,
            TagSection::Data(s) => &s.header,
            TagSection::Type(s) => &s.header,
            TagSection::Index(s) => &s.header,
        }
    }

    pub fn signature(&self) -> Signature {
        self.header().signature
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        match self {
            TagSection::SdkVersion(s) => s.write(w),
            TagSection::Data(s) => s.write(w),
            TagSection::Type(s) => s.write(w),
            TagSection::Index(s) => s.write(w),
        }
    }
}

/// Reads one `TAG0` child and advances `cursor` past it.
pub fn parse_section(cursor: &mut ByteCursor<'_>) -> DeserializationResult<TagSection> {
    let header = SectionHeader::read(cursor)?;
    let mut payload = cursor.bounded(header.payload_len(), "section payload")?;

    debug!(
        "parsing section {} at offset {} ({} payload bytes)",
        header.signature,
        header.offset,
        header.payload_len()
    );

    let section = match header.signature.as_bytes() {
        b"SDKV" => TagSection::SdkVersion(SdkVersionSection::parse(header, &mut payload)?),
        b"DATA" => TagSection::Data(DataSection::parse(header, &mut payload)?),
        b"TYPE" => TagSection::Type(TypeSection::parse(header, &mut payload)?),
        b"INDX" => TagSection::Index(IndexSection::parse(header, &mut payload)?),
        b"TCRF" | b"TCID" => {
            return Err(DeserializationError::UnsupportedSectionSignature {
                signature: header.signature,
                offset: header.offset,
            });
        }
        _ => {
            return Err(DeserializationError::UnknownSectionSignature {
                signature: header.signature,
                offset: header.offset,
            });
        }
    };

    cursor.advance(header.payload_len(), "section payload")?;
    Ok(section)
}
