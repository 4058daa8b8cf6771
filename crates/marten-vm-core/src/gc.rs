//! Managed references and heap integration
//!
//! Re-exports the collector types from `marten-vm-gc` and provides
//! [`GcRef`], the handle the core uses for every managed allocation.

use std::ops::Deref;
use std::sync::Arc;

pub use marten_vm_gc::{Collector, GcConfig, GcHeap, GcHeader, GcObject, GcStats, MarkColor};

/// Handle to a managed allocation.
///
/// Holding a `GcRef` keeps the allocation's Rust storage alive; the
/// collector's mark/sweep runs over the heap registry and governs the
/// in-use accounting. Identity (`ptr_eq`, `addr`) is the allocation
/// identity, which inline caches and class transitions rely on.
pub struct GcRef<T: GcObject>(Arc<T>);

impl<T: GcObject> GcRef<T> {
    /// Wrap a freshly constructed object. The caller is expected to
    /// adopt it into the engine heap right after.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Get the underlying shared allocation
    pub fn as_arc(&self) -> &Arc<T> {
        &self.0
    }

    /// Pointer to the object's GC header, for trace callbacks
    pub fn header_ptr(&self) -> *const GcHeader {
        self.0.header() as *const GcHeader
    }

    /// Stable identity of the allocation
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Identity comparison
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: GcObject> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: GcObject> Deref for GcRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: GcObject + std::fmt::Debug> std::fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_gc::object::tags;

    struct Dummy {
        header: GcHeader,
    }

    impl GcObject for Dummy {
        fn header(&self) -> &GcHeader {
            &self.header
        }

        fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
    }

    #[test]
    fn test_identity() {
        let a = GcRef::new(Dummy {
            header: GcHeader::new(tags::OBJECT),
        });
        let b = a.clone();
        let c = GcRef::new(Dummy {
            header: GcHeader::new(tags::OBJECT),
        });

        assert!(GcRef::ptr_eq(&a, &b));
        assert!(!GcRef::ptr_eq(&a, &c));
        assert_eq!(a.addr(), b.addr());
        assert_ne!(a.addr(), c.addr());
    }
}
