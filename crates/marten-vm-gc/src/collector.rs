//! Mark-sweep collection over the heap registry

use crate::heap::GcHeap;
use crate::object::{GcHeader, GcObject, MarkColor};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Garbage collector.
///
/// Marking is cooperative: each live object's [`GcObject::trace`]
/// reports every reference it holds, and the collector drives a gray
/// worklist from the roots. Sweeping drops registry entries that
/// stayed white; the entry's `Drop` releases non-GC resources (sparse
/// trees, slot arrays) when the last handle disappears.
pub struct Collector {
    heap: Arc<GcHeap>,
    /// Gray worklist
    worklist: VecDeque<*const GcHeader>,
    stats: GcStats,
}

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections run
    pub collections: u64,
    /// Total time spent collecting (nanoseconds)
    pub total_time_ns: u64,
    /// Bytes reclaimed in the last collection
    pub last_reclaimed: usize,
    /// Objects marked live in the last collection
    pub last_marked: usize,
    /// Objects swept in the last collection
    pub last_swept: usize,
}

impl Collector {
    /// Create a collector for the given heap
    pub fn new(heap: Arc<GcHeap>) -> Self {
        Self {
            heap,
            worklist: VecDeque::new(),
            stats: GcStats::default(),
        }
    }

    /// Run a full mark-sweep cycle from the given roots.
    ///
    /// Must be called from the engine thread while no mutator is
    /// running; the single-threaded engine guarantees this.
    pub fn collect(&mut self, roots: &[*const GcHeader]) {
        let start = std::time::Instant::now();

        // Snapshot the registry so trace callbacks can be resolved from
        // header pointers without holding the registry lock.
        let index: FxHashMap<usize, Arc<dyn GcObject + Send + Sync>> = {
            let registry = self.heap.registry.read();
            registry
                .iter()
                .map(|entry| {
                    (
                        entry.object.header() as *const GcHeader as usize,
                        Arc::clone(&entry.object),
                    )
                })
                .collect()
        };

        self.mark(roots, &index);
        let reclaimed = self.sweep();

        self.stats.collections += 1;
        self.stats.total_time_ns += start.elapsed().as_nanos() as u64;
        self.stats.last_reclaimed = reclaimed;
    }

    fn mark(
        &mut self,
        roots: &[*const GcHeader],
        index: &FxHashMap<usize, Arc<dyn GcObject + Send + Sync>>,
    ) {
        self.stats.last_marked = 0;

        for &root in roots {
            self.push_gray(root);
        }

        while let Some(header_ptr) = self.worklist.pop_front() {
            if let Some(object) = index.get(&(header_ptr as usize)) {
                let mut pending: Vec<*const GcHeader> = Vec::new();
                object.trace(&mut |child| pending.push(child));
                for child in pending {
                    self.push_gray(child);
                }
            }
            // SAFETY: the pointer came from a root or from a live
            // registry entry held alive by `index` for this cycle.
            unsafe { (*header_ptr).set_mark(MarkColor::Black) };
            self.stats.last_marked += 1;
        }
    }

    fn push_gray(&mut self, header: *const GcHeader) {
        if header.is_null() {
            return;
        }
        // SAFETY: see `mark`; roots are supplied by the engine and
        // point at live headers.
        let header_ref = unsafe { &*header };
        if header_ref.mark() == MarkColor::White {
            header_ref.set_mark(MarkColor::Gray);
            self.worklist.push_back(header);
        }
    }

    fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;
        let mut swept = 0;

        let mut registry = self.heap.registry.write();
        registry.retain(|entry| {
            let header = entry.object.header();
            if header.mark() == MarkColor::Black {
                // Survivor: reset for the next cycle
                header.set_mark(MarkColor::White);
                true
            } else {
                header.set_in_use(false);
                reclaimed += entry.size;
                swept += 1;
                false
            }
        });
        drop(registry);

        self.heap.reclaim_bytes(reclaimed);
        self.stats.last_swept = swept;
        reclaimed
    }

    /// Get statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get heap reference
    pub fn heap(&self) -> &Arc<GcHeap> {
        &self.heap
    }
}
