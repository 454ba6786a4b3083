//! Name resolution for the TYPE section.
//!
//! Records in `TNA1` and `TBDY` refer to names by index into the string pools. Resolution runs
//! once, after the section tree is parsed, and produces a [`TypeCatalog`] that classifies every
//! named type into a closed [`TypeCategory`] so later stages never match on type-name prefixes.

use crate::type_section::{StringPool, StringPoolRole, TypeChildBody, TypeSection};
use crate::varint::VarUInt;

use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeCategory {
    /// `hkArray` and its instantiations. Relocated slots carry an element count.
    Array,
    /// Pointer-like wrappers (`hkRefPtr`, `hkRefVariant`, `hkStringPtr`, `T*`).
    Pointer,
    Scalar,
    Struct,
}

const SCALAR_TYPES: &[&str] = &[
    "hkBool",
    "hkChar",
    "hkInt8",
    "hkUint8",
    "hkInt16",
    "hkUint16",
    "hkInt32",
    "hkUint32",
    "hkInt64",
    "hkUint64",
    "hkLong",
    "hkUlong",
    "hkReal",
    "hkHalf",
    "hkHalf16",
    "hkFloat32",
    "hkDouble64",
    "bool",
    "char",
    "float",
    "double",
    "int",
    "short",
    "long",
    "unsigned char",
    "unsigned short",
    "unsigned int",
    "unsigned long",
    "signed char",
    "long long",
    "unsigned long long",
];

impl TypeCategory {
    pub fn classify(name: &str) -> Self {
        if name.starts_with("hkArray") {
            TypeCategory::Array
        } else if name.starts_with("hkRefPtr")
            || name == "hkRefVariant"
            || name == "hkStringPtr"
            || name.ends_with('*')
        {
            TypeCategory::Pointer
        } else if SCALAR_TYPES.contains(&name) {
            TypeCategory::Scalar
        } else {
            TypeCategory::Struct
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub type_index: u32,
    pub name: String,
    pub category: TypeCategory,
}

/// Named types by their 1-based type index. Index 0 is the null type and never resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeCatalog {
    entries: Vec<Option<TypeInfo>>,
}

impl TypeCatalog {
    /// Build a catalog from names in type-index order, starting at type index 1.
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let entries = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                name.map(|name| TypeInfo {
                    type_index: (i + 1) as u32,
                    name: name.to_owned(),
                    category: TypeCategory::classify(name),
                })
            })
            .collect();

        TypeCatalog { entries }
    }

    pub fn get(&self, type_index: u32) -> Option<&TypeInfo> {
        let slot = (type_index as usize).checked_sub(1)?;
        self.entries.get(slot)?.as_ref()
    }

    pub fn name(&self, type_index: u32) -> Option<&str> {
        self.get(type_index).map(|t| t.name.as_str())
    }

    pub fn category(&self, type_index: u32) -> Option<TypeCategory> {
        self.get(type_index).map(|t| t.category)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TypeInfo> {
        self.iter().find(|t| t.name == name)
    }

    /// Resolved entries in type-index order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.entries.iter().flatten()
    }

    /// Number of type-index slots, resolved or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn lookup(pool: Option<&StringPool>, index: &VarUInt, what: &'static str) -> Option<String> {
    let name = pool
        .and_then(|p| p.get(index.as_index()))
        .map(str::to_owned);
    if name.is_none() {
        warn!("could not resolve {what} for string index {index}");
    }
    name
}

/// Attach names to named types, template parameters, declarations and attributes, then build the
/// catalog.
///
/// Type and template names come from the type pool, declaration names from the field pool (or
/// the type pool when there is no field pool), attributes from the attribute pool.
pub fn resolve_names(section: &mut TypeSection) -> TypeCatalog {
    let type_pool = section.string_pool(StringPoolRole::Type).cloned();
    let field_pool = section
        .string_pool(StringPoolRole::Field)
        .cloned()
        .or_else(|| type_pool.clone());
    let attribute_pool = section.string_pool(StringPoolRole::Attribute).cloned();

    if type_pool.is_none() {
        warn!("TYPE section has no type-name string pool");
    }

    for child in &mut section.children {
        match &mut child.body {
            TypeChildBody::NamedTypes(table) => {
                for ty in &mut table.types {
                    ty.name = lookup(type_pool.as_ref(), &ty.name_index, "type name");
                    ty.category = ty.name.as_deref().map(TypeCategory::classify);
                    for t in &mut ty.templates {
                        t.name = lookup(type_pool.as_ref(), &t.index, "template name");
                    }
                }
            }
            TypeChildBody::TypeBodies(bodies) => {
                for body in bodies.iter_mut() {
                    for decl in &mut body.declarations {
                        decl.name = lookup(field_pool.as_ref(), &decl.name_index, "field name");
                    }
                    if let Some(index) = &body.attribute_index {
                        body.attribute = lookup(attribute_pool.as_ref(), index, "attribute");
                    }
                }
            }
            _ => {}
        }
    }

    let catalog = TypeCatalog::from_names(section.named_types().iter().map(|t| t.name.as_deref()));
    debug!(
        "resolved {} of {} named types",
        catalog.iter().count(),
        catalog.len()
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_section::tests::{parse_type, sample_type_section};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify() {
        assert_eq!(TypeCategory::classify("hkArray"), TypeCategory::Array);
        assert_eq!(TypeCategory::classify("hkArrayOfFoo"), TypeCategory::Array);
        assert_eq!(TypeCategory::classify("hkRefPtr"), TypeCategory::Pointer);
        assert_eq!(TypeCategory::classify("hkStringPtr"), TypeCategory::Pointer);
        assert_eq!(TypeCategory::classify("hclAction*"), TypeCategory::Pointer);
        assert_eq!(TypeCategory::classify("hkInt32"), TypeCategory::Scalar);
        assert_eq!(
            TypeCategory::classify("hkRootLevelContainer"),
            TypeCategory::Struct
        );
    }

    #[test]
    fn test_resolves_names_from_pools() {
        let mut section = parse_type(&sample_type_section()).unwrap();
        let catalog = resolve_names(&mut section);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.name(1), Some("hkRootLevelContainer"));
        assert_eq!(catalog.category(1), Some(TypeCategory::Struct));
        assert_eq!(catalog.category(2), Some(TypeCategory::Array));
        assert_eq!(catalog.get(0), None);
        assert_eq!(catalog.get(3), None);
        assert_eq!(catalog.find_by_name("hkArray").map(|t| t.type_index), Some(2));

        let types = section.named_types();
        assert_eq!(types[1].templates[0].name.as_deref(), Some("tT"));
        assert_eq!(types[1].category, Some(TypeCategory::Array));

        let body = section.type_bodies().next().unwrap();
        assert_eq!(body.declarations[0].name.as_deref(), Some("namedVariants"));
    }

    #[test]
    fn test_out_of_range_index_leaves_name_unset() {
        let catalog = TypeCatalog::from_names([Some("hkInt32"), None]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.name(2), None);
        assert_eq!(catalog.iter().count(), 1);
    }
}
