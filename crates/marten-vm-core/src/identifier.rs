//! Interned property identifiers
//!
//! Property names are interned per engine, so identifier equality and
//! hashing are pointer operations. Integer-keyed properties are kept
//! algebraically distinct from named ones: [`PropertyName`] splits the
//! two at parse time and the protocol routes them separately.

use crate::string::{JsString, StringTable};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An interned property name.
///
/// Two identifiers from the same engine compare equal iff they are the
/// same allocation.
#[derive(Clone)]
pub struct Identifier(Arc<JsString>);

impl Identifier {
    pub(crate) fn from_interned(s: Arc<JsString>) -> Self {
        Self(s)
    }

    /// The identifier's text
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The backing string allocation
    pub fn string(&self) -> &Arc<JsString> {
        &self.0
    }

    /// Stable identity of the interned allocation
    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Identifier {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({:?})", self.as_str())
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-engine identifier table with the well-known set preinterned
pub struct IdentifierTable {
    strings: StringTable,
}

impl IdentifierTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            strings: StringTable::new(),
        }
    }

    /// Intern `s` as an identifier
    pub fn identifier(&self, s: &str) -> Identifier {
        Identifier(self.strings.intern(s))
    }

    /// Resolve a raw property name: canonical array indices become
    /// integer keys, everything else is interned.
    pub fn property_name(&self, s: &str) -> PropertyName {
        match array_index_of(s) {
            Some(index) => PropertyName::Index(index),
            None => PropertyName::Ident(self.identifier(s)),
        }
    }

    /// The underlying string table
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }
}

impl Default for IdentifierTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifiers the engine itself needs, interned once at startup
pub struct WellKnown {
    /// "length"
    pub length: Identifier,
    /// "prototype"
    pub prototype: Identifier,
    /// "constructor"
    pub constructor: Identifier,
    /// "name"
    pub name: Identifier,
    /// "callee"
    pub callee: Identifier,
    /// "toString"
    pub to_string: Identifier,
    /// "valueOf"
    pub value_of: Identifier,
}

impl WellKnown {
    pub(crate) fn intern(table: &IdentifierTable) -> Self {
        Self {
            length: table.identifier("length"),
            prototype: table.identifier("prototype"),
            constructor: table.identifier("constructor"),
            name: table.identifier("name"),
            callee: table.identifier("callee"),
            to_string: table.identifier("toString"),
            value_of: table.identifier("valueOf"),
        }
    }
}

/// A resolved property name: either an interned identifier or an
/// array index.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropertyName {
    /// Named property
    Ident(Identifier),
    /// Integer-keyed property
    Index(u32),
}

impl PropertyName {
    /// The array index, if this is an integer key
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Ident(_) => None,
        }
    }

    /// The identifier, if this is a named key
    pub fn as_ident(&self) -> Option<&Identifier> {
        match self {
            Self::Ident(id) => Some(id),
            Self::Index(_) => None,
        }
    }
}

impl std::fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(id) => write!(f, "{:?}", id),
            Self::Index(i) => write!(f, "Index({})", i),
        }
    }
}

impl std::fmt::Display for PropertyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(id) => write!(f, "{}", id),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<Identifier> for PropertyName {
    fn from(id: Identifier) -> Self {
        Self::Ident(id)
    }
}

impl From<u32> for PropertyName {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// Parse a canonical array index: a decimal string with no leading
/// zeros whose value is below 2^32 - 1. Anything else is a plain name.
pub fn array_index_of(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 10 {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = s.parse().ok()?;
    // 2^32 - 1 is the array length bound, not a valid index
    if value >= u32::MAX as u64 {
        return None;
    }
    Some(value as u32)
}
