//! Resource directory (`.rsrc`) model and operations.
//!
//! A resource section is a three-level tree of directory tables:
//! type, then name, then language, with the language entries pointing
//! at the actual payloads. Each level preserves insertion order for
//! iteration and lookup; the canonical on-disk order (integer ids
//! ascending, then string names ascending by UTF-16 code units) is
//! applied only at serialization time.

mod build;
mod parse;

pub use build::build;
pub use parse::parse;

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

// Well-known resource type ids.
pub const RT_ICON: u16 = 3;
pub const RT_GROUP_ICON: u16 = 14;
pub const RT_VERSION: u16 = 16;

/// Resource key: a 16-bit integer id or a Unicode name.
///
/// Integer ids order before all names; names compare by their UTF-16
/// code units.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResId {
    Id(u16),
    Name(String),
}

impl ResId {
    #[must_use]
    pub fn name(s: impl Into<String>) -> Self {
        ResId::Name(s.into())
    }

    #[must_use]
    pub fn as_id(&self) -> Option<u16> {
        match self {
            ResId::Id(id) => Some(*id),
            ResId::Name(_) => None,
        }
    }
}

impl From<u16> for ResId {
    fn from(id: u16) -> Self {
        ResId::Id(id)
    }
}

impl Ord for ResId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ResId::Id(a), ResId::Id(b)) => a.cmp(b),
            (ResId::Id(_), ResId::Name(_)) => Ordering::Less,
            (ResId::Name(_), ResId::Id(_)) => Ordering::Greater,
            (ResId::Name(a), ResId::Name(b)) => a.encode_utf16().cmp(b.encode_utf16()),
        }
    }
}

impl PartialOrd for ResId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResId::Id(id) => write!(f, "#{id}"),
            ResId::Name(name) => write!(f, "{name}"),
        }
    }
}

/// The non-count fields of a 16-byte directory table header, preserved
/// across round-trips when the table came from disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResTableHeader {
    pub characteristics: u32,
    pub timestamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
}

/// A leaf resource payload with the metadata carried by its 16-byte
/// data-entry record.
#[derive(Clone, PartialEq, Eq)]
pub struct ResData {
    pub data: Vec<u8>,
    pub codepage: u32,
    pub reserved: u32,
}

impl ResData {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            codepage: 0,
            reserved: 0,
        }
    }
}

impl fmt::Debug for ResData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResData")
            .field("len", &self.data.len())
            .field("codepage", &self.codepage)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NameNode {
    pub(crate) header: Option<ResTableHeader>,
    pub(crate) langs: IndexMap<ResId, ResData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TypeNode {
    pub(crate) header: Option<ResTableHeader>,
    pub(crate) names: IndexMap<ResId, NameNode>,
}

/// Parsed resource tree: type → name → language → data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResTable {
    pub(crate) header: Option<ResTableHeader>,
    pub(crate) types: IndexMap<ResId, TypeNode>,
}

impl ResTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a leaf. An omitted name or language selects the first
    /// inserted child at that level.
    #[must_use]
    pub fn get(&self, ty: &ResId, name: Option<&ResId>, lang: Option<&ResId>) -> Option<&ResData> {
        let type_node = self.types.get(ty)?;
        let name_node = match name {
            Some(name) => type_node.names.get(name)?,
            None => type_node.names.values().next()?,
        };
        match lang {
            Some(lang) => name_node.langs.get(lang),
            None => name_node.langs.values().next(),
        }
    }

    /// Full key path of the first leaf matching the given type and
    /// optional name.
    #[must_use]
    pub fn find(&self, ty: &ResId, name: Option<&ResId>) -> Option<(ResId, ResId, ResId)> {
        let type_node = self.types.get(ty)?;
        let (name_key, name_node) = match name {
            Some(name) => (name, type_node.names.get(name)?),
            None => {
                let (k, v) = type_node.names.first()?;
                (k, v)
            }
        };
        let (lang_key, _) = name_node.langs.first()?;
        Some((ty.clone(), name_key.clone(), lang_key.clone()))
    }

    /// Insert or replace a leaf, creating intermediate directories.
    pub fn set(&mut self, ty: ResId, name: ResId, lang: ResId, data: Vec<u8>) {
        self.types
            .entry(ty)
            .or_default()
            .names
            .entry(name)
            .or_default()
            .langs
            .insert(lang, ResData::new(data));
    }

    /// Remove a whole resource type subtree.
    pub fn delete_type(&mut self, ty: &ResId) -> bool {
        self.types.shift_remove(ty).is_some()
    }

    /// Remove one named resource under a type, pruning the type when it
    /// becomes empty.
    pub fn delete_name(&mut self, ty: &ResId, name: &ResId) -> bool {
        let Some(type_node) = self.types.get_mut(ty) else {
            return false;
        };
        let removed = type_node.names.shift_remove(name).is_some();
        if type_node.names.is_empty() {
            self.types.shift_remove(ty);
        }
        removed
    }

    /// Remove one language leaf, pruning empty parents.
    pub fn delete_lang(&mut self, ty: &ResId, name: &ResId, lang: &ResId) -> bool {
        let Some(type_node) = self.types.get_mut(ty) else {
            return false;
        };
        let Some(name_node) = type_node.names.get_mut(name) else {
            return false;
        };
        let removed = name_node.langs.shift_remove(lang).is_some();
        if name_node.langs.is_empty() {
            type_node.names.shift_remove(name);
        }
        if type_node.names.is_empty() {
            self.types.shift_remove(ty);
        }
        removed
    }

    /// Next free integer name id under a type: one past the largest
    /// existing id, or 0 when the type has no integer-named entries.
    #[must_use]
    pub fn next_id(&self, ty: &ResId) -> u16 {
        self.types
            .get(ty)
            .into_iter()
            .flat_map(|node| node.names.keys())
            .filter_map(ResId::as_id)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Lazy in-order traversal of all leaves.
    pub fn iter_leaves(&self) -> impl Iterator<Item = (&ResId, &ResId, &ResId, &ResData)> {
        self.types.iter().flat_map(|(ty, type_node)| {
            type_node.names.iter().flat_map(move |(name, name_node)| {
                name_node
                    .langs
                    .iter()
                    .map(move |(lang, data)| (ty, name, lang, data))
            })
        })
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.iter_leaves().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types currently present, in insertion order.
    pub fn type_ids(&self) -> impl Iterator<Item = &ResId> {
        self.types.keys()
    }
}
