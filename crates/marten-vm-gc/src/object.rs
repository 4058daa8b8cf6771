//! Managed-heap object header and trace contract

use std::sync::atomic::{AtomicU8, Ordering};

/// Header carried by every managed allocation.
///
/// The mark color and in-use bit belong to the collector; the owning
/// object may only touch the extensible flag. The subtype tag allows
/// fast downcast checks without consulting the dispatch table.
#[repr(C)]
pub struct GcHeader {
    /// Mark color for tri-color marking (collector-owned)
    mark: AtomicU8,
    /// State bits: in-use, extensible
    state: AtomicU8,
    /// Object subtype tag
    tag: u8,
    /// Reserved
    _reserved: [u8; 5],
}

const STATE_IN_USE: u8 = 1 << 0;
const STATE_EXTENSIBLE: u8 = 1 << 1;

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

impl GcHeader {
    /// Create a new header with the given subtype tag.
    ///
    /// Fresh allocations start extensible and not in use; the heap sets
    /// the in-use bit when it adopts the allocation.
    pub const fn new(tag: u8) -> Self {
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            state: AtomicU8::new(STATE_EXTENSIBLE),
            tag,
            _reserved: [0; 5],
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color (collector only)
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Whether the allocation is currently adopted by a heap
    pub fn in_use(&self) -> bool {
        self.state.load(Ordering::Acquire) & STATE_IN_USE != 0
    }

    /// Set or clear the in-use bit (heap/collector only)
    pub fn set_in_use(&self, in_use: bool) {
        if in_use {
            self.state.fetch_or(STATE_IN_USE, Ordering::AcqRel);
        } else {
            self.state.fetch_and(!STATE_IN_USE, Ordering::AcqRel);
        }
    }

    /// Whether new properties may be added to the owning object
    pub fn is_extensible(&self) -> bool {
        self.state.load(Ordering::Acquire) & STATE_EXTENSIBLE != 0
    }

    /// Clear the extensible flag. There is no way back: once an object
    /// stops being extensible it stays that way.
    pub fn clear_extensible(&self) {
        self.state.fetch_and(!STATE_EXTENSIBLE, Ordering::AcqRel);
    }

    /// Get the subtype tag
    pub fn tag(&self) -> u8 {
        self.tag
    }
}

impl Clone for GcHeader {
    fn clone(&self) -> Self {
        // A cloned header is a fresh allocation: white, not yet adopted
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            state: AtomicU8::new(self.state.load(Ordering::Acquire) & !STATE_IN_USE),
            tag: self.tag,
            _reserved: [0; 5],
        }
    }
}

impl std::fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcHeader")
            .field("mark", &self.mark())
            .field("in_use", &self.in_use())
            .field("extensible", &self.is_extensible())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Trait every managed heap type must implement.
///
/// `trace` is the mark contract from the system design: it must invoke
/// the tracer on the header of every managed reference the object
/// holds, directly or indirectly (slot arrays, array data, sparse
/// trees, prototype links). The collector calls it at most once per
/// live object per cycle.
pub trait GcObject {
    /// Get the GC header
    fn header(&self) -> &GcHeader;

    /// Report every held managed reference to the tracer
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader));
}

/// Object subtype tags
pub mod tags {
    /// Immutable string
    pub const STRING: u8 = 1;
    /// Ordinary object
    pub const OBJECT: u8 = 2;
    /// Array exotic object
    pub const ARRAY: u8 = 3;
    /// String wrapper object
    pub const STRING_OBJECT: u8 = 4;
    /// Number wrapper object
    pub const NUMBER_OBJECT: u8 = 5;
    /// Boolean wrapper object
    pub const BOOLEAN_OBJECT: u8 = 6;
    /// Date object
    pub const DATE_OBJECT: u8 = 7;
    /// Function object
    pub const FUNCTION_OBJECT: u8 = 8;
    /// Arguments object
    pub const ARGUMENTS_OBJECT: u8 = 9;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marking() {
        let header = GcHeader::new(tags::OBJECT);
        assert_eq!(header.mark(), MarkColor::White);

        header.set_mark(MarkColor::Gray);
        assert_eq!(header.mark(), MarkColor::Gray);

        header.set_mark(MarkColor::Black);
        assert_eq!(header.mark(), MarkColor::Black);
    }

    #[test]
    fn test_header_state_bits() {
        let header = GcHeader::new(tags::ARRAY);
        assert!(!header.in_use());
        assert!(header.is_extensible());

        header.set_in_use(true);
        assert!(header.in_use());

        header.clear_extensible();
        assert!(!header.is_extensible());
        // In-use bit unaffected by extensibility change
        assert!(header.in_use());
    }

    #[test]
    fn test_clone_resets_collector_state() {
        let header = GcHeader::new(tags::STRING);
        header.set_in_use(true);
        header.set_mark(MarkColor::Black);

        let cloned = header.clone();
        assert_eq!(cloned.mark(), MarkColor::White);
        assert!(!cloned.in_use());
        assert_eq!(cloned.tag(), tags::STRING);
    }
}
