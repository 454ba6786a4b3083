//! `hkRootLevelContainer`: the entry point of the object graph.
//!
//! It sits at the start of the resolved DATA and lists the top-level objects as named variants.

use crate::err::{DeserializationResult, SerializationResult};
use crate::pointer::{Array, Readable, RefVariant, StringPtr, Writable};
use crate::utils::{ByteCursor, WriteStream};

use serde::Serialize;

pub const ROOT_LEVEL_CONTAINER: &str = "hkRootLevelContainer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedVariant {
    pub name: StringPtr,
    pub class_name: StringPtr,
    pub variant: RefVariant,
}

impl Readable for NamedVariant {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(8)?;
        Ok(NamedVariant {
            name: StringPtr::read(cursor)?,
            class_name: StringPtr::read(cursor)?,
            variant: RefVariant::read(cursor)?,
        })
    }
}

impl Writable for NamedVariant {
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        w.align_to(8)?;
        self.name.write(w)?;
        self.class_name.write(w)?;
        self.variant.write(w)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootLevelContainer {
    pub named_variants: Array<NamedVariant>,
}

impl Readable for RootLevelContainer {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        cursor.align_to(8)?;
        Ok(RootLevelContainer {
            named_variants: Array::read(cursor)?,
        })
    }
}

impl Writable for RootLevelContainer {
    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.named_variants.write(w)
    }
}

impl RootLevelContainer {
    /// Read the container at `offset` of a resolved DATA buffer.
    pub fn read_at(data: &[u8], offset: usize) -> DeserializationResult<Self> {
        let mut cursor = ByteCursor::with_pos(data, offset)?;
        Self::read(&mut cursor)
    }

    pub fn find_by_class(&self, class_name: &str) -> Option<&NamedVariant> {
        self.named_variants
            .iter()
            .find(|v| v.class_name.as_str() == Some(class_name))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&NamedVariant> {
        self.named_variants
            .iter()
            .find(|v| v.name.as_str() == Some(name))
    }

    /// Absolute DATA offset of the first object of `class_name`.
    pub fn object_offset(&self, class_name: &str) -> Option<usize> {
        self.find_by_class(class_name)
            .and_then(|v| v.variant.target())
            .and_then(|t| usize::try_from(t).ok())
    }
}
