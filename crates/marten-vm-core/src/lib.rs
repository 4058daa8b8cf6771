//! # Marten VM Core
//!
//! The object model and property storage core of an embeddable
//! ECMAScript engine: tagged values, shared internal classes (hidden
//! classes), dual-representation array storage, the uniform property
//! protocol, execution-context chains, and per-callsite lookup caches.
//!
//! The bytecode interpreter, parser, and full built-in library are
//! external collaborators; they drive this core exclusively through
//! [`engine::ExecutionEngine`] entry points and the [`runtime`]
//! dispatch helpers.

pub mod array_data;
pub mod context;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod gc;
pub mod identifier;
pub mod internal_class;
pub mod lookup;
pub mod object;
pub mod property;
pub mod runtime;
pub mod string;
pub mod value;

pub use engine::ExecutionEngine;
pub use error::{VmError, VmResult};
pub use gc::GcRef;
pub use object::JsObject;
pub use value::Value;
