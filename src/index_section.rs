//! `INDX`: the item table (`ITEM`) and the relocation patch lists (`PTCH`).

use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::section::{SectionHeader, write_section};
use crate::utils::{ByteCursor, WriteStream, bytes};

use log::{debug, trace, warn};
use serde::Serialize;

/// One row of the relocation lookup table. Its index is its position in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Item {
    pub flags: u16,
    pub type_index: u16,
    pub data_offset: i32,
    pub count: u32,
}

impl Item {
    pub const SIZE: usize = 12;

    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        Ok(Item {
            flags: cursor.u16_named("item.flags")?,
            type_index: cursor.u16_named("item.type_index")?,
            data_offset: cursor.i32_named("item.data_offset")?,
            count: cursor.u32_named("item.count")?,
        })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.write_u16(self.flags)?;
        w.write_u16(self.type_index)?;
        w.write_i32(self.data_offset)?;
        w.write_u32(self.count)
    }
}

/// A list of DATA offsets whose stored item index must be turned into a relative pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    /// 1-based named type index, 0 when untyped.
    pub type_index: u32,
    pub offsets: Vec<u32>,
}

impl Patch {
    /// `type_index` and `count` with no offsets.
    pub const MIN_SIZE: usize = 8;

    pub fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let type_index = cursor.u32_named("patch.type_index")?;
        let count = cursor.u32_named("patch.count")? as usize;

        let need = count.saturating_mul(4);
        if need > cursor.remaining() {
            return Err(bytes::truncated(
                "patch.offsets",
                cursor.tell(),
                need,
                cursor.buf().len(),
            ));
        }

        let offsets = (0..count)
            .map(|_| cursor.u32_named("patch.offset"))
            .collect::<DeserializationResult<Vec<u32>>>()?;

        Ok(Patch {
            type_index,
            offsets,
        })
    }

    pub fn count(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.write_u32(self.type_index)?;
        w.write_u32(self.count())?;
        for offset in &self.offsets {
            w.write_u32(*offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSection {
    pub header: SectionHeader,
    pub items: Vec<Item>,
}

impl ItemSection {
    fn parse(header: SectionHeader, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let len = header.payload_len();
        if len % Item::SIZE != 0 {
            return Err(DeserializationError::InvalidSectionSize {
                signature: header.signature,
                offset: header.offset,
                size: header.size.size(),
            });
        }

        let items = (0..len / Item::SIZE)
            .map(|_| Item::read(payload))
            .collect::<DeserializationResult<Vec<Item>>>()?;

        debug!("ITEM table has {} entries", items.len());
        Ok(ItemSection { header, items })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            for item in &self.items {
                item.write(w)?;
            }
            Ok(())
        })
    }
}

/// `PTCH`: internal patches, a zero sentinel, then optionally external patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSection {
    pub header: SectionHeader,
    pub internal: Vec<Patch>,
    pub terminator: Option<u32>,
    pub external: Option<Vec<Patch>>,
    #[serde(skip)]
    pub trailing: Vec<u8>,
}

impl PatchSection {
    fn parse(header: SectionHeader, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let mut internal = Vec::new();
        // The sentinel is a patch whose type index is 0.
        while let Some(type_index) = bytes::read_u32_le(payload.buf(), payload.tell()) {
            if type_index == 0 {
                break;
            }
            internal.push(Patch::read(payload)?);
        }

        let terminator = if payload.remaining() >= 4 {
            Some(payload.u32_named("patch list terminator")?)
        } else {
            None
        };

        let external = if payload.remaining() > Patch::MIN_SIZE {
            let mut external = Vec::new();
            while !payload.is_eof() {
                external.push(Patch::read(payload)?);
            }
            Some(external)
        } else {
            None
        };

        let trailing = payload
            .read_exact(payload.remaining(), "patch section trailing bytes")?
            .to_vec();

        if terminator.is_none() {
            warn!(
                "PTCH section at offset {} has no zero terminator",
                header.offset
            );
        }

        debug!(
            "PTCH section: {} internal patches, {} external patches",
            internal.len(),
            external.as_ref().map_or(0, Vec::len)
        );

        Ok(PatchSection {
            header,
            internal,
            terminator,
            external,
            trailing,
        })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            for patch in &self.internal {
                patch.write(w)?;
            }
            if let Some(terminator) = self.terminator {
                w.write_u32(terminator)?;
            }
            for patch in self.external.iter().flatten() {
                patch.write(w)?;
            }
            w.write_bytes(&self.trailing, "patch section trailing bytes")
        })
    }

    /// Total number of offsets across the internal patches.
    pub fn internal_offset_count(&self) -> usize {
        self.internal.iter().map(|p| p.offsets.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum IndexChild {
    Items(ItemSection),
    Patches(PatchSection),
}

impl IndexChild {
    pub fn header(&self) -> &SectionHeader {
        match self {
            IndexChild::Items(s) => &s.header,
            IndexChild::Patches(s) => &s.header,
        }
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        match self {
            IndexChild::Items(s) => s.write(w),
            IndexChild::Patches(s) => s.write(w),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSection {
    pub header: SectionHeader,
    pub children: Vec<IndexChild>,
}

impl IndexSection {
    pub(crate) fn parse(
        header: SectionHeader,
        payload: &mut ByteCursor<'_>,
    ) -> DeserializationResult<Self> {
        let mut children = Vec::new();

        while !payload.is_eof() {
            let child = SectionHeader::read(payload)?;
            let mut body = payload.bounded(child.payload_len(), "INDX child payload")?;
            trace!("INDX child {} at offset {}", child.signature, child.offset);

            let parsed = match child.signature.as_bytes() {
                b"ITEM" => IndexChild::Items(ItemSection::parse(child, &mut body)?),
                b"PTCH" => IndexChild::Patches(PatchSection::parse(child, &mut body)?),
                _ => {
                    return Err(DeserializationError::UnknownSectionSignature {
                        signature: child.signature,
                        offset: child.offset,
                    });
                }
            };

            payload.advance(child.payload_len(), "INDX child payload")?;
            children.push(parsed);
        }

        Ok(IndexSection { header, children })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            for child in &self.children {
                child.write(w)?;
            }
            Ok(())
        })
    }

    pub fn items(&self) -> &[Item] {
        self.children
            .iter()
            .find_map(|c| match c {
                IndexChild::Items(s) => Some(s.items.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn patches(&self) -> Option<&PatchSection> {
        self.children.iter().find_map(|c| match c {
            IndexChild::Patches(s) => Some(s),
            _ => None,
        })
    }

    /// Internal patches, the ones the relocation engine applies.
    pub fn internal_patches(&self) -> &[Patch] {
        self.patches().map_or(&[], |p| p.internal.as_slice())
    }
}
