use crate::err::{
    DeserializationError, DeserializationResult, PhiveError, Result, SerializationError,
    SerializationResult,
};
use crate::phive_header::{BLOB_ALIGNMENT, FileType, PhiveHeader};
use crate::relocation::{RelocationEngine, RelocationTable};
use crate::root_level::RootLevelContainer;
use crate::section::SDK_VERSION;
use crate::string_table::{TypeCatalog, resolve_names};
use crate::tag_file::TagFile;
use crate::utils::{ByteCursor, WriteStream};

use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Magic of the parameter archive that usually follows the tag file.
pub const PARAM_BLOB_MAGIC: &[u8; 4] = b"AAMP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserSettings {
    /// `None` accepts any file type.
    expected_file_type: Option<FileType>,
    /// Reject files whose `SDKV` is not [`SDK_VERSION`]. When off, a mismatch is logged.
    strict_version: bool,
    /// Reverse the relocation right after loading and compare with the stored DATA.
    verify_round_trip: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            expected_file_type: Some(FileType::Cloth),
            strict_version: true,
            verify_round_trip: false,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    pub fn expected_file_type(mut self, file_type: Option<FileType>) -> Self {
        self.expected_file_type = file_type;
        self
    }

    pub fn strict_version(mut self, strict: bool) -> Self {
        self.strict_version = strict;
        self
    }

    pub fn verify_round_trip(mut self, verify: bool) -> Self {
        self.verify_round_trip = verify;
        self
    }

    pub fn get_expected_file_type(&self) -> Option<FileType> {
        self.expected_file_type
    }

    pub fn should_be_strict_about_version(&self) -> bool {
        self.strict_version
    }

    pub fn should_verify_round_trip(&self) -> bool {
        self.verify_round_trip
    }
}

/// The load pipeline. Each state owns everything produced so far; a failed transition
/// consumes the state, so there is never a partially loaded file.
#[derive(Debug)]
pub enum LoadState<'a> {
    Unparsed {
        bytes: &'a [u8],
    },
    HeaderParsed {
        bytes: &'a [u8],
        header: PhiveHeader,
    },
    SectionTreeParsed {
        bytes: &'a [u8],
        header: PhiveHeader,
        tag_file: TagFile,
    },
    StringsResolved {
        bytes: &'a [u8],
        header: PhiveHeader,
        tag_file: TagFile,
        catalog: TypeCatalog,
    },
    Relocated {
        bytes: &'a [u8],
        header: PhiveHeader,
        tag_file: TagFile,
        catalog: TypeCatalog,
        resolved_data: Vec<u8>,
        relocations: RelocationTable,
    },
    Ready(Box<PhiveFile>),
}

impl<'a> LoadState<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        LoadState::Unparsed { bytes }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadState::Unparsed { .. } => "unparsed",
            LoadState::HeaderParsed { .. } => "header parsed",
            LoadState::SectionTreeParsed { .. } => "section tree parsed",
            LoadState::StringsResolved { .. } => "strings resolved",
            LoadState::Relocated { .. } => "relocated",
            LoadState::Ready(_) => "ready",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    /// Perform the next transition. `Ready` stays `Ready`.
    pub fn advance(self, settings: &ParserSettings) -> Result<Self> {
        let next = match self {
            LoadState::Unparsed { bytes } => {
                let header = PhiveHeader::read(&mut ByteCursor::new(bytes))?;
                if let Some(expected) = settings.get_expected_file_type()
                    && header.file_type != expected as u8
                {
                    return Err(DeserializationError::InvalidFileType {
                        found: header.file_type,
                        expected: expected as u8,
                    }
                    .into());
                }
                LoadState::HeaderParsed { bytes, header }
            }

            LoadState::HeaderParsed { bytes, header } => {
                let range = header.tagfile_range(bytes.len())?;
                let mut cursor = ByteCursor::with_pos(&bytes[..range.end], range.start)?;
                let tag_file = TagFile::parse(&mut cursor)?;

                if cursor.tell() != range.end {
                    warn!(
                        "tag file ends at {:#x} but the header says {:#x}",
                        cursor.tell(),
                        range.end
                    );
                }

                let version = &tag_file.sdk_version.version;
                if version != SDK_VERSION {
                    if settings.should_be_strict_about_version() {
                        return Err(DeserializationError::InvalidVersion {
                            found: version.clone(),
                            expected: SDK_VERSION,
                        }
                        .into());
                    }
                    warn!("SDK version `{version}` differs from `{SDK_VERSION}`, continuing");
                }

                LoadState::SectionTreeParsed {
                    bytes,
                    header,
                    tag_file,
                }
            }

            LoadState::SectionTreeParsed {
                bytes,
                header,
                mut tag_file,
            } => {
                let catalog = resolve_names(&mut tag_file.types);
                LoadState::StringsResolved {
                    bytes,
                    header,
                    tag_file,
                    catalog,
                }
            }

            LoadState::StringsResolved {
                bytes,
                header,
                tag_file,
                catalog,
            } => {
                let engine = RelocationEngine::new(
                    tag_file.index.items(),
                    tag_file.index.internal_patches(),
                    &catalog,
                );
                let (resolved_data, relocations) = engine.forward(&tag_file.data.data)?;
                LoadState::Relocated {
                    bytes,
                    header,
                    tag_file,
                    catalog,
                    resolved_data,
                    relocations,
                }
            }

            LoadState::Relocated {
                bytes,
                header,
                tag_file,
                catalog,
                resolved_data,
                relocations,
            } => {
                let param_blob = bytes[header.param_range(bytes.len())?].to_vec();
                let file_end_blob = bytes[header.file_end_range(bytes.len())?].to_vec();

                if !param_blob.is_empty() && !param_blob.starts_with(PARAM_BLOB_MAGIC) {
                    warn!(
                        "parameter blob at {:#x} does not start with `AAMP`",
                        header.param_offset
                    );
                }

                if settings.should_verify_round_trip() {
                    relocations.verify_round_trip(&tag_file.data.data, &resolved_data)?;
                }

                LoadState::Ready(Box::new(PhiveFile {
                    header,
                    tag_file,
                    catalog,
                    resolved_data,
                    relocations,
                    param_blob,
                    file_end_blob,
                }))
            }

            ready @ LoadState::Ready(_) => ready,
        };

        debug!("load state -> {}", next.name());
        Ok(next)
    }

    /// Advance until `Ready`.
    pub fn run(self, settings: &ParserSettings) -> Result<PhiveFile> {
        let mut state = self;
        loop {
            state = match state {
                LoadState::Ready(file) => return Ok(*file),
                other => other.advance(settings)?,
            };
        }
    }
}

/// A fully loaded `Phive` container.
#[derive(Debug, Clone)]
pub struct PhiveFile {
    header: PhiveHeader,
    tag_file: TagFile,
    catalog: TypeCatalog,
    resolved_data: Vec<u8>,
    relocations: RelocationTable,
    param_blob: Vec<u8>,
    file_end_blob: Vec<u8>,
}

/// Counts reported by `phive_dump info`.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary<'a> {
    pub header: &'a PhiveHeader,
    pub file_type: Option<FileType>,
    pub sdk_version: &'a str,
    pub sections: Vec<String>,
    pub data_size: usize,
    pub named_types: usize,
    pub items: usize,
    pub relocations: usize,
    pub lossy_array_counts: usize,
    pub param_blob_size: usize,
    pub file_end_blob_size: usize,
}

fn u32_field(value: usize, what: &'static str) -> SerializationResult<u32> {
    u32::try_from(value).map_err(|_| SerializationError::SizeOverflow { what, size: value })
}

/// Writes `blob` at the next aligned offset. An empty blob is not written and gets offset 0.
fn write_blob(
    w: &mut WriteStream,
    blob: &[u8],
    what: &'static str,
) -> SerializationResult<(u32, u32)> {
    if blob.is_empty() {
        return Ok((0, 0));
    }
    w.align_to(BLOB_ALIGNMENT)?;
    let offset = w.tell();
    w.write_bytes(blob, what)?;
    Ok((u32_field(offset, what)?, u32_field(blob.len(), what)?))
}

impl PhiveFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with(bytes, &ParserSettings::default())
    }

    pub fn from_bytes_with(bytes: &[u8], settings: &ParserSettings) -> Result<Self> {
        LoadState::new(bytes).run(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with(path, &ParserSettings::default())
    }

    pub fn from_path_with(path: impl AsRef<Path>, settings: &ParserSettings) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| PhiveError::FailedToRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("read {} bytes from {}", bytes.len(), path.display());
        Self::from_bytes_with(&bytes, settings)
    }

    pub fn header(&self) -> &PhiveHeader {
        &self.header
    }

    pub fn tag_file(&self) -> &TagFile {
        &self.tag_file
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn relocations(&self) -> &RelocationTable {
        &self.relocations
    }

    /// DATA with every patched slot holding a self-relative offset.
    pub fn resolved_data(&self) -> &[u8] {
        &self.resolved_data
    }

    /// The length is fixed: relocation records address the buffer by offset.
    pub fn resolved_data_mut(&mut self) -> &mut [u8] {
        &mut self.resolved_data
    }

    /// DATA exactly as it was read from the file.
    pub fn original_data(&self) -> &[u8] {
        &self.tag_file.data.data
    }

    pub fn param_blob(&self) -> &[u8] {
        &self.param_blob
    }

    pub fn file_end_blob(&self) -> &[u8] {
        &self.file_end_blob
    }

    /// The current resolved DATA turned back into its stored (index) form.
    pub fn stored_data(&self) -> SerializationResult<Vec<u8>> {
        self.relocations.reverse(&self.resolved_data)
    }

    pub fn verify_round_trip(&self) -> SerializationResult<()> {
        self.relocations
            .verify_round_trip(self.original_data(), &self.resolved_data)
    }

    pub fn root_level_container(&self) -> DeserializationResult<RootLevelContainer> {
        RootLevelContainer::read_at(&self.resolved_data, 0)
    }

    pub fn summary(&self) -> FileSummary<'_> {
        FileSummary {
            header: &self.header,
            file_type: self.header.file_type(),
            sdk_version: &self.tag_file.sdk_version.version,
            sections: self.tag_file.order.iter().map(|s| s.to_string()).collect(),
            data_size: self.resolved_data.len(),
            named_types: self.catalog.iter().count(),
            items: self.tag_file.index.items().len(),
            relocations: self.relocations.len(),
            lossy_array_counts: self.relocations.lossy_offsets().len(),
            param_blob_size: self.param_blob.len(),
            file_end_blob_size: self.file_end_blob.len(),
        }
    }

    /// Serialize the container. The tag file is rebuilt from the reversed DATA, each part
    /// starts on a 16-byte boundary, and the header offsets and sizes are recomputed.
    pub fn to_bytes(&self) -> SerializationResult<Vec<u8>> {
        let stored = self.stored_data()?;
        let mut header = self.header.clone();

        let mut w = WriteStream::with_capacity(
            PhiveHeader::PADDED_SIZE
                + self.tag_file.header.size.size() as usize
                + self.param_blob.len()
                + self.file_end_blob.len()
                + 2 * BLOB_ALIGNMENT,
        );
        header.write(&mut w)?;

        w.align_to(BLOB_ALIGNMENT)?;
        let tagfile_offset = w.tell();
        self.tag_file.write_with_data(&mut w, &stored)?;
        header.tagfile_offset = u32_field(tagfile_offset, "tag file")?;
        header.tagfile_size = u32_field(w.tell() - tagfile_offset, "tag file")?;

        (header.param_offset, header.param_size) =
            write_blob(&mut w, &self.param_blob, "parameter blob")?;
        (header.file_end_offset, header.file_end_size) =
            write_blob(&mut w, &self.file_end_blob, "file end blob")?;

        let end = w.tell();
        w.seek(0);
        header.write(&mut w)?;
        w.seek(end);

        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_env_logger_initialized;
    use crate::type_section::tests::{framed, sample_type_section};
    use pretty_assertions::assert_eq;

    /// A cloth container whose DATA holds one `hkRootLevelContainer` pointer at 0 that
    /// resolves to 16.
    fn sample_file(version: &[u8], file_type: FileType) -> Vec<u8> {
        let mut items = Vec::new();
        for (data_offset, count) in [(0_i32, 0_u32), (16, 1)] {
            items.extend(0_u16.to_le_bytes());
            items.extend(1_u16.to_le_bytes());
            items.extend(data_offset.to_le_bytes());
            items.extend(count.to_le_bytes());
        }
        let mut patches = Vec::new();
        for v in [1_u32, 1, 0, 0] {
            patches.extend(v.to_le_bytes());
        }
        let mut index = framed(b"ITEM", &items);
        index.extend(framed(b"PTCH", &patches));

        let mut data = vec![0_u8; 32];
        data[0] = 1;
        data[16..20].copy_from_slice(b"body");

        let tag = framed(
            b"TAG0",
            &[
                framed(b"SDKV", version),
                framed(b"DATA", &data),
                sample_type_section(),
                framed(b"INDX", &index),
            ]
            .concat(),
        );

        let param = b"AAMP\x02\x00\x00\x00".to_vec();
        let tag_end = 48 + tag.len();
        let param_offset = tag_end.next_multiple_of(16);

        let header = PhiveHeader {
            magic: crate::phive_header::PHIVE_MAGIC,
            reserve0: 0,
            reserve1: 0,
            byte_order_mark: 0xFEFF,
            file_type: file_type as u8,
            max_section_capacity: 0,
            tagfile_offset: 48,
            param_offset: param_offset as u32,
            file_end_offset: 0,
            tagfile_size: tag.len() as u32,
            param_size: param.len() as u32,
            file_end_size: 0,
        };
        let mut w = WriteStream::new();
        header.write(&mut w).unwrap();
        w.write_bytes(&tag, "tag").unwrap();
        w.align_to(16).unwrap();
        w.write_bytes(&param, "param").unwrap();
        w.into_inner()
    }

    #[test]
    fn test_load_reaches_ready_through_every_state() {
        ensure_env_logger_initialized();
        let bytes = sample_file(b"20220100", FileType::Cloth);
        let settings = ParserSettings::new().verify_round_trip(true);

        let mut state = LoadState::new(&bytes);
        let mut names = vec![state.name()];
        while !state.is_ready() {
            state = state.advance(&settings).unwrap();
            names.push(state.name());
        }
        assert_eq!(
            names,
            vec![
                "unparsed",
                "header parsed",
                "section tree parsed",
                "strings resolved",
                "relocated",
                "ready"
            ]
        );

        let file = state.run(&settings).unwrap();
        assert_eq!(&file.resolved_data()[..8], &16_i64.to_le_bytes());
        assert_eq!(file.original_data()[0], 1);
        assert_eq!(file.param_blob(), b"AAMP\x02\x00\x00\x00");
        assert!(file.file_end_blob().is_empty());
        assert_eq!(file.relocations().len(), 1);
    }

    #[test]
    fn test_to_bytes_reproduces_input() {
        let bytes = sample_file(b"20220100", FileType::Cloth);
        let file = PhiveFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_file_type_is_checked() {
        let bytes = sample_file(b"20220100", FileType::NavMesh);
        assert!(matches!(
            PhiveFile::from_bytes(&bytes),
            Err(PhiveError::Deserialization(
                DeserializationError::InvalidFileType {
                    found: 1,
                    expected: 3
                }
            ))
        ));

        let any = ParserSettings::new().expected_file_type(None);
        assert!(PhiveFile::from_bytes_with(&bytes, &any).is_ok());
    }

    #[test]
    fn test_version_strictness() {
        let bytes = sample_file(b"20240100", FileType::Cloth);
        assert!(matches!(
            PhiveFile::from_bytes(&bytes),
            Err(PhiveError::Deserialization(
                DeserializationError::InvalidVersion { .. }
            ))
        ));

        let lenient = ParserSettings::new().strict_version(false);
        let file = PhiveFile::from_bytes_with(&bytes, &lenient).unwrap();
        assert_eq!(file.tag_file().sdk_version.version, "20240100");
    }

    #[test]
    fn test_truncated_tag_file_fails() {
        let bytes = sample_file(b"20220100", FileType::Cloth);
        assert!(matches!(
            PhiveFile::from_bytes(&bytes[..100]),
            Err(PhiveError::Deserialization(
                DeserializationError::OffsetOutOfRange { .. }
            ))
        ));
    }

    #[test]
    fn test_edits_to_resolved_data_survive_to_bytes() {
        let bytes = sample_file(b"20220100", FileType::Cloth);
        let mut file = PhiveFile::from_bytes(&bytes).unwrap();
        file.resolved_data_mut()[16..20].copy_from_slice(b"BODY");

        let out = file.to_bytes().unwrap();
        let reloaded = PhiveFile::from_bytes(&out).unwrap();
        assert_eq!(&reloaded.resolved_data()[16..20], b"BODY");
        assert_eq!(reloaded.original_data()[0], 1);
    }
}
