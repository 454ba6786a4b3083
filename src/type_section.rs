//! `TYPE`: the reflected type information of a tag file.
//!
//! Children are keyed by signature, several of which are aliases of the same record layout:
//!
//! | kind          | signatures                                     |
//! |---------------|------------------------------------------------|
//! | padding       | `TPTR`, `TPAD`                                 |
//! | string pool   | `TST1`, `FST1`, `AST1`, `TSTR`, `FSTR`, `ASTR` |
//! | named types   | `TNA1`, `TNAM`                                 |
//! | type bodies   | `TBDY`, `TBOD`                                 |
//! | type hashes   | `THSH`                                         |
//!
//! `TSHA`, `TPRO`, `TPHS` and `TSEQ` exist in the format but are not supported.
//!
//! Any bytes left inside a child after its records are kept and written back verbatim.

use crate::err::{DeserializationError, DeserializationResult, SerializationResult};
use crate::section::{SectionHeader, Signature, write_section};
use crate::string_table::TypeCategory;
use crate::utils::{ByteCursor, WriteStream};
use crate::varint::VarUInt;

use bitflags::bitflags;
use log::{debug, trace};
use serde::Serialize;

bitflags! {
    /// Which optional members follow a type body's `flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeBodyFlags: u64 {
        const FORMAT = 1 << 0;
        const SUBTYPE = 1 << 1;
        const VERSION = 1 << 2;
        const SIZE_ALIGN = 1 << 3;
        const UNKNOWN_FLAGS = 1 << 4;
        const DECLARATIONS = 1 << 5;
        const INTERFACES = 1 << 6;
        const ATTRIBUTE = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeclarationFlags: u64 {
        /// A single reserved byte follows the flags.
        const RESERVED_BYTE = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeChildKind {
    Padding,
    StringPool,
    NamedTypes,
    TypeBodies,
    TypeHashes,
}

const KIND_ALIASES: &[(TypeChildKind, &[&[u8; 4]])] = &[
    (TypeChildKind::Padding, &[b"TPTR", b"TPAD"]),
    (
        TypeChildKind::StringPool,
        &[b"TST1", b"FST1", b"AST1", b"TSTR", b"FSTR", b"ASTR"],
    ),
    (TypeChildKind::NamedTypes, &[b"TNA1", b"TNAM"]),
    (TypeChildKind::TypeBodies, &[b"TBDY", b"TBOD"]),
    (TypeChildKind::TypeHashes, &[b"THSH"]),
];

const UNSUPPORTED_SIGNATURES: &[&[u8; 4]] = &[b"TSHA", b"TPRO", b"TPHS", b"TSEQ"];

impl TypeChildKind {
    /// Resolve a child signature, rejecting unsupported and unknown ones.
    pub fn from_signature(signature: Signature, offset: u64) -> DeserializationResult<Self> {
        let sig = signature.as_bytes();

        if let Some((kind, _)) = KIND_ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&sig))
        {
            return Ok(*kind);
        }

        if UNSUPPORTED_SIGNATURES.contains(&sig) {
            Err(DeserializationError::UnsupportedSectionSignature { signature, offset })
        } else {
            Err(DeserializationError::UnknownSectionSignature { signature, offset })
        }
    }
}

/// Which names a string pool provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StringPoolRole {
    /// `TST1`/`TSTR`: type and template names.
    Type,
    /// `FST1`/`FSTR`: declaration (field) names.
    Field,
    /// `AST1`/`ASTR`: attribute strings.
    Attribute,
}

impl StringPoolRole {
    fn from_signature(signature: Signature) -> Self {
        match signature.as_bytes()[0] {
            b'F' => StringPoolRole::Field,
            b'A' => StringPoolRole::Attribute,
            _ => StringPoolRole::Type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringPool {
    pub role: StringPoolRole,
    pub strings: Vec<String>,
}

impl StringPool {
    /// Reads NUL-terminated strings until the pool ends. A string starting with a byte that has
    /// its high bit set, or one without a terminator, ends the pool; those bytes stay unread.
    fn parse(role: StringPoolRole, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let mut strings = Vec::new();
        while !payload.is_eof() {
            match payload.c_string("string pool entry") {
                Ok(Some(s)) => strings.push(s.to_owned()),
                Ok(None) | Err(DeserializationError::TruncatedInput { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(StringPool { role, strings })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        for s in &self.strings {
            w.write_bytes(s.as_bytes(), "string pool entry")?;
            w.write_u8(0)?;
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub index: VarUInt,
    pub value: VarUInt,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedType {
    pub name_index: VarUInt,
    pub template_count: VarUInt,
    pub templates: Vec<Template>,
    pub name: Option<String>,
    pub category: Option<TypeCategory>,
}

impl NamedType {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let name_index = VarUInt::read(cursor)?;
        let template_count = VarUInt::read(cursor)?;

        let mut templates = Vec::new();
        for _ in 0..template_count.value() {
            templates.push(Template {
                index: VarUInt::read(cursor)?,
                value: VarUInt::read(cursor)?,
                name: None,
            });
        }

        Ok(NamedType {
            name_index,
            template_count,
            templates,
            name: None,
            category: None,
        })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.name_index.write(w)?;
        self.template_count.write(w)?;
        for t in &self.templates {
            t.index.write(w)?;
            t.value.write(w)?;
        }
        Ok(())
    }
}

/// `TNA1`: a count followed by `count - 1` named types (type index 0 is the null type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedTypeTable {
    pub count: VarUInt,
    pub types: Vec<NamedType>,
}

impl NamedTypeTable {
    fn parse(payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let count = VarUInt::read(payload)?;
        let types = (0..count.value().saturating_sub(1))
            .map(|_| NamedType::read(payload))
            .collect::<DeserializationResult<Vec<_>>>()?;
        Ok(NamedTypeTable { count, types })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.count.write(w)?;
        for t in &self.types {
            t.write(w)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub name_index: VarUInt,
    pub flags: VarUInt,
    pub reserved: Option<u8>,
    pub offset: VarUInt,
    pub type_index: VarUInt,
    pub name: Option<String>,
}

impl Declaration {
    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let name_index = VarUInt::read(cursor)?;
        let flags = VarUInt::read(cursor)?;
        let reserved = if DeclarationFlags::from_bits_retain(flags.value())
            .contains(DeclarationFlags::RESERVED_BYTE)
        {
            Some(cursor.u8_named("declaration reserved byte")?)
        } else {
            None
        };

        Ok(Declaration {
            name_index,
            flags,
            reserved,
            offset: VarUInt::read(cursor)?,
            type_index: VarUInt::read(cursor)?,
            name: None,
        })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.name_index.write(w)?;
        self.flags.write(w)?;
        if let Some(b) = self.reserved {
            w.write_u8(b)?;
        }
        self.offset.write(w)?;
        self.type_index.write(w)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub type_index: VarUInt,
    pub flags: VarUInt,
}

/// One `TBDY` record. Every member after `type_index` is absent when `type_index` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TypeBody {
    pub type_index: VarUInt,
    pub parent_type_index: Option<VarUInt>,
    pub flags: Option<VarUInt>,
    pub format: Option<VarUInt>,
    pub subtype: Option<VarUInt>,
    pub version: Option<VarUInt>,
    pub size: Option<VarUInt>,
    pub alignment: Option<VarUInt>,
    pub unknown_flags: Option<VarUInt>,
    pub declaration_count: Option<VarUInt>,
    pub declarations: Vec<Declaration>,
    pub interface_count: Option<VarUInt>,
    pub interfaces: Vec<Interface>,
    pub attribute_index: Option<VarUInt>,
    pub attribute: Option<String>,
}

fn read_opt(
    cursor: &mut ByteCursor<'_>,
    present: bool,
) -> DeserializationResult<Option<VarUInt>> {
    if present {
        Ok(Some(VarUInt::read(cursor)?))
    } else {
        Ok(None)
    }
}

fn write_opt(v: &Option<VarUInt>, w: &mut WriteStream) -> SerializationResult<()> {
    match v {
        Some(v) => v.write(w),
        None => Ok(()),
    }
}

impl TypeBody {
    pub fn body_flags(&self) -> TypeBodyFlags {
        self.flags
            .as_ref()
            .map_or(TypeBodyFlags::empty(), |f| {
                TypeBodyFlags::from_bits_retain(f.value())
            })
    }

    fn read(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let type_index = VarUInt::read(cursor)?;
        if type_index.value() == 0 {
            return Ok(TypeBody {
                type_index,
                ..Default::default()
            });
        }

        let parent_type_index = Some(VarUInt::read(cursor)?);
        let raw_flags = VarUInt::read(cursor)?;
        let flags = TypeBodyFlags::from_bits_retain(raw_flags.value());

        let format = read_opt(cursor, flags.contains(TypeBodyFlags::FORMAT))?;
        let subtype = read_opt(cursor, flags.contains(TypeBodyFlags::SUBTYPE))?;
        let version = read_opt(cursor, flags.contains(TypeBodyFlags::VERSION))?;
        let size = read_opt(cursor, flags.contains(TypeBodyFlags::SIZE_ALIGN))?;
        let alignment = read_opt(cursor, flags.contains(TypeBodyFlags::SIZE_ALIGN))?;
        let unknown_flags = read_opt(cursor, flags.contains(TypeBodyFlags::UNKNOWN_FLAGS))?;

        let declaration_count = read_opt(cursor, flags.contains(TypeBodyFlags::DECLARATIONS))?;
        let mut declarations = Vec::new();
        for _ in 0..declaration_count.as_ref().map_or(0, VarUInt::value) {
            declarations.push(Declaration::read(cursor)?);
        }

        let interface_count = read_opt(cursor, flags.contains(TypeBodyFlags::INTERFACES))?;
        let mut interfaces = Vec::new();
        for _ in 0..interface_count.as_ref().map_or(0, VarUInt::value) {
            interfaces.push(Interface {
                type_index: VarUInt::read(cursor)?,
                flags: VarUInt::read(cursor)?,
            });
        }

        let attribute_index = read_opt(cursor, flags.contains(TypeBodyFlags::ATTRIBUTE))?;

        Ok(TypeBody {
            type_index,
            parent_type_index,
            flags: Some(raw_flags),
            format,
            subtype,
            version,
            size,
            alignment,
            unknown_flags,
            declaration_count,
            declarations,
            interface_count,
            interfaces,
            attribute_index,
            attribute: None,
        })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.type_index.write(w)?;
        write_opt(&self.parent_type_index, w)?;
        write_opt(&self.flags, w)?;
        write_opt(&self.format, w)?;
        write_opt(&self.subtype, w)?;
        write_opt(&self.version, w)?;
        write_opt(&self.size, w)?;
        write_opt(&self.alignment, w)?;
        write_opt(&self.unknown_flags, w)?;
        write_opt(&self.declaration_count, w)?;
        for d in &self.declarations {
            d.write(w)?;
        }
        write_opt(&self.interface_count, w)?;
        for i in &self.interfaces {
            i.type_index.write(w)?;
            i.flags.write(w)?;
        }
        write_opt(&self.attribute_index, w)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeHash {
    pub type_index: VarUInt,
    pub hash: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeHashTable {
    pub count: VarUInt,
    pub hashes: Vec<TypeHash>,
}

impl TypeHashTable {
    fn parse(payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let count = VarUInt::read(payload)?;
        let mut hashes = Vec::new();
        for _ in 0..count.value() {
            hashes.push(TypeHash {
                type_index: VarUInt::read(payload)?,
                hash: payload.u32_named("type hash")?,
            });
        }
        Ok(TypeHashTable { count, hashes })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        self.count.write(w)?;
        for h in &self.hashes {
            h.type_index.write(w)?;
            w.write_u32(h.hash)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "records")]
pub enum TypeChildBody {
    Padding,
    StringPool(StringPool),
    NamedTypes(NamedTypeTable),
    TypeBodies(Vec<TypeBody>),
    TypeHashes(TypeHashTable),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeChild {
    pub header: SectionHeader,
    pub body: TypeChildBody,
    /// Unparsed bytes after the records (all of a padding child's payload).
    #[serde(skip)]
    pub trailing: Vec<u8>,
}

impl TypeChild {
    fn parse(header: SectionHeader, payload: &mut ByteCursor<'_>) -> DeserializationResult<Self> {
        let kind = TypeChildKind::from_signature(header.signature, header.offset)?;
        trace!("TYPE child {} ({:?}) at offset {}", header.signature, kind, header.offset);

        let body = match kind {
            TypeChildKind::Padding => TypeChildBody::Padding,
            TypeChildKind::StringPool => TypeChildBody::StringPool(StringPool::parse(
                StringPoolRole::from_signature(header.signature),
                payload,
            )?),
            TypeChildKind::NamedTypes => TypeChildBody::NamedTypes(NamedTypeTable::parse(payload)?),
            TypeChildKind::TypeBodies => {
                let mut bodies = Vec::new();
                while !payload.is_eof() {
                    bodies.push(TypeBody::read(payload)?);
                }
                TypeChildBody::TypeBodies(bodies)
            }
            TypeChildKind::TypeHashes => TypeChildBody::TypeHashes(TypeHashTable::parse(payload)?),
        };

        let trailing = payload
            .read_exact(payload.remaining(), "TYPE child trailing bytes")?
            .to_vec();

        Ok(TypeChild {
            header,
            body,
            trailing,
        })
    }

    fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            match &self.body {
                TypeChildBody::Padding => {}
                TypeChildBody::StringPool(p) => p.write(w)?,
                TypeChildBody::NamedTypes(t) => t.write(w)?,
                TypeChildBody::TypeBodies(bodies) => {
                    for b in bodies {
                        b.write(w)?;
                    }
                }
                TypeChildBody::TypeHashes(h) => h.write(w)?,
            }
            w.write_bytes(&self.trailing, "TYPE child trailing bytes")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSection {
    pub header: SectionHeader,
    pub children: Vec<TypeChild>,
}

impl TypeSection {
    pub(crate) fn parse(
        header: SectionHeader,
        payload: &mut ByteCursor<'_>,
    ) -> DeserializationResult<Self> {
        let mut children = Vec::new();
        while !payload.is_eof() {
            let child = SectionHeader::read(payload)?;
            let mut body = payload.bounded(child.payload_len(), "TYPE child payload")?;
            children.push(TypeChild::parse(child, &mut body)?);
            payload.advance(child.payload_len(), "TYPE child payload")?;
        }

        debug!("TYPE section has {} children", children.len());
        Ok(TypeSection { header, children })
    }

    pub fn write(&self, w: &mut WriteStream) -> SerializationResult<()> {
        write_section(w, &self.header, |w| {
            for child in &self.children {
                child.write(w)?;
            }
            Ok(())
        })
    }

    /// The first string pool with the given role.
    pub fn string_pool(&self, role: StringPoolRole) -> Option<&StringPool> {
        self.children.iter().find_map(|c| match &c.body {
            TypeChildBody::StringPool(p) if p.role == role => Some(p),
            _ => None,
        })
    }

    pub fn named_types(&self) -> &[NamedType] {
        self.children
            .iter()
            .find_map(|c| match &c.body {
                TypeChildBody::NamedTypes(t) => Some(t.types.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn type_bodies(&self) -> impl Iterator<Item = &TypeBody> {
        self.children
            .iter()
            .filter_map(|c| match &c.body {
                TypeChildBody::TypeBodies(b) => Some(b.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn type_hashes(&self) -> impl Iterator<Item = &TypeHash> {
        self.children
            .iter()
            .filter_map(|c| match &c.body {
                TypeChildBody::TypeHashes(h) => Some(h.hashes.iter()),
                _ => None,
            })
            .flatten()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::section::Size;
    use pretty_assertions::assert_eq;

    pub(crate) fn framed(signature: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Size::new(1, (payload.len() + 8) as u32)
            .to_raw()
            .to_be_bytes()
            .to_vec();
        out.extend_from_slice(signature);
        out.extend_from_slice(payload);
        out
    }

    /// A TYPE section with one child of every supported kind, trailing bytes included.
    pub(crate) fn sample_type_section() -> Vec<u8> {
        let mut children = Vec::new();
        children.extend(framed(b"TPTR", &[0; 8]));
        children.extend(framed(
            b"TST1",
            b"hkRootLevelContainer\0hkArray\0hkInt32\0tT\0\xFF\xFF",
        ));
        children.extend(framed(b"FST1", b"namedVariants\0count\0"));

        // Three entries, two named types. `hkArray<hkInt32>` has one template.
        let tna1 = [3, 0, 0, 1, 1, 3, 3];
        children.extend(framed(b"TNA1", &tna1));

        // Body for type 1: parent 0, flags = SIZE_ALIGN | DECLARATIONS,
        // size 16 alignment 8, one declaration "namedVariants" (flags 0x80, so a reserved
        // byte follows) at offset 0xAA, then one empty body as padding.
        let tbdy = [1, 0, 0x28, 16, 8, 1, 0, 0x80, 0x80, 0x5A, 0x80, 0xAA, 2, 0];
        children.extend(framed(b"TBDY", &tbdy));

        let mut thsh = vec![1, 1];
        thsh.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
        children.extend(framed(b"THSH", &thsh));

        framed(b"TYPE", &children)
    }

    pub(crate) fn parse_type(bytes: &[u8]) -> DeserializationResult<TypeSection> {
        let mut cursor = ByteCursor::new(bytes);
        let header = SectionHeader::read(&mut cursor)?;
        let mut payload = cursor.bounded(header.payload_len(), "TYPE")?;
        TypeSection::parse(header, &mut payload)
    }

    #[test]
    fn test_every_child_kind_round_trips() {
        let bytes = sample_type_section();
        let section = parse_type(&bytes).unwrap();
        assert_eq!(section.children.len(), 6);

        let mut w = WriteStream::new();
        section.write(&mut w).unwrap();
        assert_eq!(w.into_inner(), bytes);
    }

    #[test]
    fn test_string_pool_stops_at_high_bit() {
        let section = parse_type(&sample_type_section()).unwrap();
        let pool = section.string_pool(StringPoolRole::Type).unwrap();
        assert_eq!(
            pool.strings,
            vec!["hkRootLevelContainer", "hkArray", "hkInt32", "tT"]
        );
        let tst1 = &section.children[1];
        assert_eq!(tst1.trailing, vec![0xFF, 0xFF]);

        let fields = section.string_pool(StringPoolRole::Field).unwrap();
        assert_eq!(fields.get(1), Some("count"));
    }

    #[test]
    fn test_named_types_and_bodies() {
        let section = parse_type(&sample_type_section()).unwrap();

        let types = section.named_types();
        assert_eq!(types.len(), 2);
        assert_eq!(types[1].name_index.value(), 1);
        assert_eq!(types[1].templates.len(), 1);
        assert_eq!(types[1].templates[0].index.value(), 3);
        assert_eq!(types[1].templates[0].value.value(), 3);

        let bodies: Vec<_> = section.type_bodies().collect();
        assert_eq!(bodies.len(), 2);
        let body = bodies[0];
        assert_eq!(
            body.body_flags(),
            TypeBodyFlags::SIZE_ALIGN | TypeBodyFlags::DECLARATIONS
        );
        assert_eq!(body.size.as_ref().map(VarUInt::value), Some(16));
        assert_eq!(body.declarations.len(), 1);

        let decl = &body.declarations[0];
        assert_eq!(decl.reserved, Some(0x5A));
        assert_eq!(decl.offset.value(), 0xAA);
        assert_eq!(decl.type_index.value(), 2);
        assert_eq!(bodies[1].type_index.value(), 0);

        let hashes: Vec<_> = section.type_hashes().collect();
        assert_eq!(hashes[0].hash, 0xDEAD_BEEF);
    }

    #[test]
    fn test_unsupported_and_unknown_children() {
        let bytes = framed(b"TYPE", &framed(b"TSHA", &[0; 4]));
        assert!(matches!(
            parse_type(&bytes),
            Err(DeserializationError::UnsupportedSectionSignature { .. })
        ));

        let bytes = framed(b"TYPE", &framed(b"ZZZZ", &[]));
        assert!(matches!(
            parse_type(&bytes),
            Err(DeserializationError::UnknownSectionSignature { .. })
        ));
    }

    #[test]
    fn test_alias_lookup() {
        for sig in [b"TST1", b"FSTR", b"ASTR"] {
            assert_eq!(
                TypeChildKind::from_signature(Signature(*sig), 0).unwrap(),
                TypeChildKind::StringPool
            );
        }
        assert_eq!(
            TypeChildKind::from_signature(Signature(*b"TNAM"), 0).unwrap(),
            TypeChildKind::NamedTypes
        );
        assert_eq!(
            StringPoolRole::from_signature(Signature(*b"AST1")),
            StringPoolRole::Attribute
        );
    }
}
