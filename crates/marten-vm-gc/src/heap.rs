//! GC heap: allocation registry and accounting

use crate::object::GcObject;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Heap size that triggers a collection suggestion (default: 16MB)
    pub trigger_size: usize,
    /// GC trigger ratio relative to `trigger_size` (default: 0.75)
    pub trigger_ratio: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            trigger_size: 16 * 1024 * 1024,
            trigger_ratio: 0.75,
        }
    }
}

/// One adopted allocation
pub(crate) struct HeapEntry {
    pub(crate) object: Arc<dyn GcObject + Send + Sync>,
    pub(crate) size: usize,
}

/// The managed heap.
///
/// Every engine allocation is adopted here after construction; the
/// registry is the sweep domain of [`crate::Collector`]. Allocation
/// itself is ordinary Rust allocation, the heap only tracks liveness
/// and byte accounting.
pub struct GcHeap {
    config: GcConfig,
    /// Total bytes accounted to live allocations
    allocated: AtomicUsize,
    pub(crate) registry: RwLock<Vec<HeapEntry>>,
}

impl GcHeap {
    /// Create a new heap with default config
    pub fn new() -> Arc<Self> {
        Self::with_config(GcConfig::default())
    }

    /// Create a new heap with custom config
    pub fn with_config(config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            allocated: AtomicUsize::new(0),
            registry: RwLock::new(Vec::new()),
        })
    }

    /// Adopt an allocation into the sweep domain.
    ///
    /// `size` is the caller's estimate of the retained bytes; it only
    /// feeds accounting, never layout.
    pub fn adopt<T>(&self, object: Arc<T>, size: usize)
    where
        T: GcObject + Send + Sync + 'static,
    {
        object.header().set_in_use(true);
        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.registry.write().push(HeapEntry { object, size });
    }

    /// Get current accounted bytes
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of live adopted allocations
    pub fn live_objects(&self) -> usize {
        self.registry.read().len()
    }

    /// Check if a collection should be triggered
    pub fn should_gc(&self) -> bool {
        let allocated = self.allocated() as f64;
        let threshold = self.config.trigger_size as f64 * self.config.trigger_ratio;
        allocated > threshold
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub(crate) fn reclaim_bytes(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcHeader, tags};

    struct Leaf {
        header: GcHeader,
    }

    impl GcObject for Leaf {
        fn header(&self) -> &GcHeader {
            &self.header
        }

        fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
    }

    #[test]
    fn test_heap_creation() {
        let heap = GcHeap::new();
        assert_eq!(heap.allocated(), 0);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn test_adopt_accounts_bytes_and_sets_in_use() {
        let heap = GcHeap::new();
        let leaf = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });
        assert!(!leaf.header().in_use());

        heap.adopt(Arc::clone(&leaf), 64);
        assert!(leaf.header().in_use());
        assert_eq!(heap.allocated(), 64);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_should_gc_threshold() {
        let heap = GcHeap::with_config(GcConfig {
            trigger_size: 100,
            trigger_ratio: 0.5,
        });
        assert!(!heap.should_gc());

        let leaf = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });
        heap.adopt(leaf, 80);
        assert!(heap.should_gc());
    }
}
