//! Engine error types

use crate::value::Value;
use thiserror::Error;

/// Result alias for engine operations
pub type VmResult<T> = Result<T, VmError>;

/// One frame of a captured call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Function name, or `"<anonymous>"`
    pub function: String,
}

/// A script exception in flight, together with the stack captured at
/// the throw site.
#[derive(Debug, Clone)]
pub struct ThrownValue {
    /// The thrown value (often an Error object, but any value throws)
    pub value: Value,
    /// Best-effort message extracted from the value
    pub message: String,
    /// Call stack at the throw site, innermost first
    pub stack: Vec<StackFrame>,
}

/// Errors produced by the engine.
///
/// The boolean-result convention splits failure in two: operations
/// that merely "do not happen" (a rejected put in non-strict code)
/// return `Ok(false)`, while anything that must surface to script as
/// an exception returns `Err`.
#[derive(Debug, Error)]
pub enum VmError {
    /// TypeError
    #[error("TypeError: {0}")]
    TypeError(String),

    /// ReferenceError
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// RangeError
    #[error("RangeError: {0}")]
    RangeError(String),

    /// SyntaxError
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// URIError
    #[error("URIError: {0}")]
    URIError(String),

    /// Call depth exceeded the engine limit
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Allocation failed or the heap limit was hit
    #[error("out of memory")]
    OutOfMemory,

    /// A script-thrown value propagating as an exception
    #[error("uncaught exception: {}", .0.message)]
    Exception(Box<ThrownValue>),

    /// Engine invariant violation
    #[error("internal error: {0}")]
    InternalError(String),
}

impl VmError {
    /// TypeError with a message
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// ReferenceError with a message
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// RangeError with a message
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Whether this error carries a script-visible value
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }
}
