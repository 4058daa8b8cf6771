//! Immutable engine strings
//!
//! Strings are immutable and interned per engine, so equality of
//! interned strings is pointer equality. There is no process-global
//! table: every engine owns its own.

use dashmap::DashMap;
use marten_vm_gc::object::tags;
use marten_vm_gc::{GcHeader, GcObject};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Per-engine string intern table
pub struct StringTable {
    strings: DashMap<Arc<str>, Arc<JsString>>,
}

impl StringTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
        }
    }

    /// Intern a string, returning the canonical allocation for its
    /// contents within this engine.
    pub fn intern(&self, s: &str) -> Arc<JsString> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(&existing);
        }

        let data: Arc<str> = Arc::from(s);
        let interned = Arc::new(JsString::from_shared(Arc::clone(&data)));
        self.strings.insert(data, Arc::clone(&interned));
        interned
    }

    /// Check whether a string is interned
    pub fn is_interned(&self, s: &str) -> bool {
        self.strings.contains_key(s)
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable string with a GC header.
///
/// UTF-16 code units are the script-visible unit of length and
/// indexing; storage is UTF-8.
pub struct JsString {
    header: GcHeader,
    data: Arc<str>,
    hash: u64,
}

impl JsString {
    /// Create a string without interning (for synthesized temporaries)
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self::from_shared(s.into())
    }

    fn from_shared(data: Arc<str>) -> Self {
        let hash = Self::compute_hash(&data);
        Self {
            header: GcHeader::new(tags::STRING),
            data,
            hash,
        }
    }

    /// Get the string contents
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Script-visible length in UTF-16 code units
    pub fn len_utf16(&self) -> usize {
        self.data.encode_utf16().count()
    }

    /// Byte length of the UTF-8 storage
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Precomputed content hash
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// The single UTF-16 code unit at `index`, if in range.
    ///
    /// Used by the String wrapper to synthesize indexed properties.
    pub fn code_unit_at(&self, index: usize) -> Option<u16> {
        self.data.encode_utf16().nth(index)
    }

    /// One-code-unit substring at `index`, if in range
    pub fn char_string_at(&self, index: usize) -> Option<String> {
        self.code_unit_at(index)
            .map(|unit| String::from_utf16_lossy(&[unit]))
    }

    fn compute_hash(s: &str) -> u64 {
        let mut hasher = FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Debug for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsString({:?})", self.data)
    }
}

impl std::fmt::Display for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        self.data == other.data
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.data
    }
}

impl GcObject for JsString {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {
        // Strings hold no managed references
    }
}
