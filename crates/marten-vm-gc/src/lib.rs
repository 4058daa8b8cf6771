//! # Marten VM Garbage Collector
//!
//! Cooperative mark-sweep collector for the engine core.
//!
//! ## Design
//!
//! - Every managed allocation carries a [`GcHeader`] and implements
//!   [`GcObject`], whose `trace` callback must enumerate every heap
//!   reference the object holds. A missed reference is a leak of
//!   liveness information, not a crash: ownership stays safe.
//! - The heap keeps a registry of adopted allocations. Marking walks a
//!   gray worklist from the roots; sweeping drops registry entries that
//!   stayed white, running their finalizers through normal `Drop`.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod heap;
pub mod object;

pub use collector::{Collector, GcStats};
pub use heap::{GcConfig, GcHeap};
pub use object::{GcHeader, GcObject, MarkColor};
