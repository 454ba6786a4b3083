//! The `TAG0` tag file: `SDKV`, `DATA`, `TYPE` and `INDX`, each exactly once, in any order.

use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::index_section::IndexSection;
use crate::section::{
    DataSection, SdkVersionSection, SectionHeader, Signature, TagSection, parse_section,
    write_section,
};
use crate::type_section::TypeSection;
use crate::utils::{ByteCursor, WriteStream};

use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagFile {
    pub header: SectionHeader,
    pub sdk_version: SdkVersionSection,
    pub data: DataSection,
    pub types: TypeSection,
    pub index: IndexSection,
    /// Child signatures in the order they were read, used when writing.
    pub order: Vec<Signature>,
}

fn store<T>(
    slot: &mut Option<T>,
    value: T,
    signature: Signature,
    offset: u64,
) -> DeserializationResult<()> {
    if slot.is_some() {
        return Err(DeserializationError::DuplicateSection { signature, offset });
    }
    *slot = Some(value);
    Ok(())
}

fn required<T>(slot: Option<T>, signature: &'static str) -> DeserializationResult<T> {
    slot.ok_or(DeserializationError::MissingSection { signature })
}

impl TagFile {
    pub fn parse(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let header = SectionHeader::read(cursor)?;
        if header.signature != Signature::TAG0 {
            return Err(DeserializationError::InvalidMagic {
                what: "tag file",
                expected: b"TAG0",
                found: header.signature.as_bytes().to_vec(),
            });
        }

        let mut payload = cursor.bounded(header.payload_len(), "TAG0 payload")?;

        let mut sdk_version = None;
        let mut data = None;
        let mut types = None;
        let mut index = None;
        let mut order = Vec::with_capacity(4);

        while !payload.is_eof() {
            let offset = payload.position();
            let section = parse_section(&mut payload)?;
            let signature = section.signature();

            match section {
                TagSection::SdkVersion(s) => store(&mut sdk_version, s, signature, offset)?,
                TagSection::Data(s) => store(&mut data, s, signature, offset)?,
                TagSection::Type(s) => store(&mut types, s, signature, offset)?,
                TagSection::Index(s) => store(&mut index, s, signature, offset)?,
            }
            order.push(signature);
        }

        cursor.advance(header.payload_len(), "TAG0 payload")?;

        let tag_file = TagFile {
            header,
            sdk_version: required(sdk_version, "SDKV")?,
            data: required(data, "DATA")?,
            types: required(types, "TYPE")?,
            index: required(index, "INDX")?,
            order,
        };

        debug!(
            "TAG0 at offset {}: SDK {}, {} DATA bytes, {} items",
            tag_file.header.offset,
            tag_file.sdk_version.version,
            tag_file.data.data.len(),
            tag_file.index.items().len()
        );

        Ok(tag_file)
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.write_with_data(w, &self.data.data)
    }

    /// Write the tag file with `data` as the DATA payload.
    pub fn write_with_data(&self, w: &mut WriteStream, data: &[u8]) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            for signature in &self.order {
                match signature.as_bytes() {
                    b"SDKV" => self.sdk_version.write(w)?,
                    b"DATA" => write_section(w, &self.data.header, |w| {
                        w.write_bytes(data, "DATA payload")
                    })?,
                    b"TYPE" => self.types.write(w)?,
                    b"INDX" => self.index.write(w)?,
                    _ => {}
                }
            }
            Ok(())
        })
    }

    pub fn to_bytes(&self) -> SerializationResult<Vec<u8>> {
        let mut w = WriteStream::new();
        self.write(&mut w)?;
        Ok(w.into_inner())
    }
}
