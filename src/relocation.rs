//! Index ⇄ pointer relocation of the DATA section.
//!
//! In the stored form every pointer slot listed by a `PTCH` patch holds a `u32` index into the
//! `ITEM` table. The resolved form replaces the slot with a 64-bit offset relative to the slot
//! itself, and for `hkArray` slots also fills in the element count 8 bytes further on.
//!
//! Both directions read one buffer through a [`ByteCursor`] and write a fresh buffer through a
//! [`WriteStream`]; the input is never modified. The forward pass records every slot it touched
//! in a [`RelocationTable`], which is what makes the reverse pass possible.

use crate::err::{
    DeserializationError, DeserializationResult, SerializationError, SerializationResult,
};
use crate::index_section::{Item, Patch};
use crate::string_table::{TypeCatalog, TypeCategory};
use crate::utils::{Ambiguous64, ByteCursor, WriteStream};

use hashbrown::HashMap;
use log::{debug, trace, warn};
use serde::Serialize;

/// Size of a pointer slot.
pub const SLOT_SIZE: usize = 8;
/// Size of an `hkArray` header (`ptr`, `i32 length`, `i32 capacity_flags`).
pub const ARRAY_HEADER_SIZE: usize = 16;

/// A reference slot in either of its two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reference {
    /// Stored form: an index into the item table.
    Unresolved(u32),
    /// Resolved form: target offset relative to the slot. 0 is null.
    Resolved(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArrayCount {
    /// The count in the stored buffer (normally 0).
    pub stored: u32,
    /// The count written from the item table.
    pub resolved: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationRecord {
    pub offset: usize,
    pub type_index: u32,
    pub stored: Reference,
    pub resolved: Reference,
    /// Upper half of the stored 8-byte slot, restored verbatim on reverse.
    pub stored_high: u32,
    pub array_count: Option<ArrayCount>,
}

impl RelocationRecord {
    pub fn is_null(&self) -> bool {
        self.resolved == Reference::Resolved(0)
    }

    fn stored_index(&self) -> u32 {
        match self.stored {
            Reference::Unresolved(i) => i,
            // Never constructed this way.
            Reference::Resolved(v) => v as u32,
        }
    }

    /// Reverse relocation writes 0 for array counts, so a nonzero stored count is not
    /// reproduced.
    pub fn is_lossy(&self) -> bool {
        self.array_count.is_some_and(|c| c.stored != 0)
    }
}

/// The side table produced by forward relocation, in application order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelocationTable {
    records: Vec<RelocationRecord>,
    #[serde(skip)]
    by_offset: HashMap<usize, usize>,
}

impl RelocationTable {
    fn push(&mut self, record: RelocationRecord) {
        self.by_offset.insert(record.offset, self.records.len());
        self.records.push(record);
    }

    pub fn records(&self) -> &[RelocationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The last record applied at `offset`.
    pub fn get(&self, offset: usize) -> Option<&RelocationRecord> {
        self.by_offset.get(&offset).map(|&i| &self.records[i])
    }

    /// Offsets of array-count fields that reverse relocation cannot reproduce.
    pub fn lossy_offsets(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.is_lossy())
            .map(|r| r.offset + SLOT_SIZE)
            .collect()
    }

    /// Turn a resolved buffer back into its stored form.
    pub fn reverse(&self, resolved: &[u8]) -> SerializationResult<Vec<u8>> {
        let len = resolved.len();
        let mut out = WriteStream::from_vec(resolved.to_vec());

        for record in &self.records {
            let end = if record.array_count.is_some() {
                record.offset + SLOT_SIZE + 4
            } else {
                record.offset + SLOT_SIZE
            };
            if end > len {
                return Err(SerializationError::OffsetOutOfRange {
                    what: "relocated slot",
                    offset: record.offset,
                    len,
                });
            }

            out.seek(record.offset);
            out.write_u32(record.stored_index())?;
            out.write_u32(record.stored_high)?;
            if record.array_count.is_some() {
                out.write_u32(0)?;
            }
        }

        Ok(out.into_inner())
    }

    /// Check that reversing `resolved` reproduces `stored`, ignoring lossy array counts.
    pub fn verify_round_trip(&self, stored: &[u8], resolved: &[u8]) -> SerializationResult<()> {
        let reversed = self.reverse(resolved)?;
        if reversed.len() != stored.len() {
            return Err(SerializationError::RoundTripLengthMismatch {
                expected: stored.len(),
                found: reversed.len(),
            });
        }

        let lossy = self.lossy_offsets();
        let in_lossy_slot = |pos: usize| lossy.iter().any(|&o| (o..o + 4).contains(&pos));

        match stored
            .iter()
            .zip(reversed.iter())
            .enumerate()
            .find(|(pos, (a, b))| a != b && !in_lossy_slot(*pos))
        {
            Some((offset, (&expected, &found))) => Err(SerializationError::RoundTripMismatch {
                offset,
                expected,
                found,
            }),
            None => Ok(()),
        }
    }
}

/// Applies internal patches to a stored DATA buffer.
#[derive(Debug, Clone, Copy)]
pub struct RelocationEngine<'a> {
    items: &'a [Item],
    patches: &'a [Patch],
    catalog: &'a TypeCatalog,
}

fn out_of_range(what: &'static str, offset: usize, len: usize) -> DeserializationError {
    DeserializationError::OffsetOutOfRange {
        what,
        offset: offset as i64,
        len,
    }
}

impl<'a> RelocationEngine<'a> {
    pub fn new(items: &'a [Item], patches: &'a [Patch], catalog: &'a TypeCatalog) -> Self {
        RelocationEngine {
            items,
            patches,
            catalog,
        }
    }

    /// Produce the resolved form of `stored` and the table of every slot touched.
    pub fn forward(&self, stored: &[u8]) -> DeserializationResult<(Vec<u8>, RelocationTable)> {
        let len = stored.len();
        let mut reader = ByteCursor::new(stored);
        let mut writer = WriteStream::from_vec(stored.to_vec());
        let mut table = RelocationTable::default();

        for patch in self.patches {
            for &offset in &patch.offsets {
                let record = self.apply(patch.type_index, offset as usize, &mut reader, &mut writer)?;
                table.push(record);
            }
        }

        debug_assert_eq!(writer.len(), len);
        debug!(
            "relocated {} slots ({} null, {} lossy array counts)",
            table.len(),
            table.records.iter().filter(|r| r.is_null()).count(),
            table.records.iter().filter(|r| r.is_lossy()).count()
        );

        Ok((writer.into_inner(), table))
    }

    fn apply(
        &self,
        type_index: u32,
        offset: usize,
        reader: &mut ByteCursor<'_>,
        writer: &mut WriteStream,
    ) -> DeserializationResult<RelocationRecord> {
        let len = reader.buf().len();
        if offset.checked_add(SLOT_SIZE).is_none_or(|end| end > len) {
            return Err(out_of_range("patch offset", offset, len));
        }

        reader.seek(offset, "patch offset")?;
        let index = reader.u32_named("stored item index")?;
        let stored_high = reader.u32_named("stored slot high bits")?;

        let Some(item) = self.items.get(index as usize) else {
            trace!("slot {offset:#x}: item index {index} out of range, writing null");
            writer.seek(offset);
            writer
                .write_u64(0)
                .map_err(|_| out_of_range("patch offset", offset, len))?;
            return Ok(RelocationRecord {
                offset,
                type_index,
                stored: Reference::Unresolved(index),
                resolved: Reference::Resolved(0),
                stored_high,
                array_count: None,
            });
        };

        let mut array_count = None;
        if type_index > 0 {
            let info = self
                .catalog
                .get(type_index)
                .ok_or(DeserializationError::UnresolvedTypeName { type_index })?;

            if info.category == TypeCategory::Array {
                let count_offset = offset + SLOT_SIZE;
                if count_offset + 4 > len {
                    return Err(out_of_range("array count", count_offset, len));
                }
                reader.seek(count_offset, "array count")?;
                let stored_count = reader.u32_named("stored array count")?;
                if stored_count != 0 {
                    warn!(
                        "slot {offset:#x} ({}) already holds array count {stored_count}",
                        info.name
                    );
                }

                writer.seek(count_offset);
                writer
                    .write_u32(item.count)
                    .map_err(|_| out_of_range("array count", count_offset, len))?;
                array_count = Some(ArrayCount {
                    stored: stored_count,
                    resolved: item.count,
                });
            }
        }

        let target = item.data_offset;
        if target < 0 || target as usize > len {
            return Err(DeserializationError::OffsetOutOfRange {
                what: "item data offset",
                offset: i64::from(target),
                len,
            });
        }

        let relative = i64::from(target) - offset as i64;
        trace!("slot {offset:#x}: item {index} -> {relative:+}");

        writer.seek(offset);
        writer
            .write_ambiguous_64(Ambiguous64::from_i64(relative))
            .map_err(|_| out_of_range("patch offset", offset, len))?;

        Ok(RelocationRecord {
            offset,
            type_index,
            stored: Reference::Unresolved(index),
            resolved: Reference::Resolved(relative),
            stored_high,
            array_count,
        })
    }
}
