//! Tagged values with NaN-boxing
//!
//! A value is 64 bits of payload plus, for managed references, the
//! handle that keeps the allocation's storage alive. Exactly one tag
//! is active at a time; callers must go through the tag predicates and
//! never assume a bit layout.
//!
//! ## Encoding scheme
//!
//! ```text
//! Regular doubles: any bit pattern whose exponent != 0x7FF
//! NaN-boxed:       quiet-NaN space, discriminated by the payload
//!
//! - Double:     stored directly (except NaN)
//! - NaN:        0x7FFA_0000_0000_0000 (canonical, distinct from undefined)
//! - Integer:    0x7FF8_0001_XXXX_XXXX (32-bit signed payload)
//! - Pointer:    0x7FFC_XXXX_XXXX_XXXX
//! - Undefined:  0x7FF8_0000_0000_0000
//! - Null:       0x7FF8_0000_0000_0001
//! - True:       0x7FF8_0000_0000_0002
//! - False:      0x7FF8_0000_0000_0003
//! - Empty:      0x7FF8_0000_0000_0004 (internal hole sentinel,
//!               never observable from script)
//! ```

use crate::gc::{GcHeader, GcRef};
use crate::object::JsObject;
use crate::string::JsString;
use std::sync::Arc;

const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
const TAG_EMPTY: u64 = 0x7FF8_0000_0000_0004;
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

/// Reference to a managed allocation held by a value
#[derive(Clone)]
pub enum HeapRef {
    /// Immutable string
    String(Arc<JsString>),
    /// Object (any kind)
    Object(GcRef<JsObject>),
}

impl std::fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapRef::String(s) => f.debug_tuple("String").field(s).finish(),
            HeapRef::Object(_) => f.debug_tuple("Object").finish(),
        }
    }
}

/// An engine value.
///
/// Copied freely; when it wraps a managed reference the relation is
/// non-owning from the collector's point of view: the holder's only
/// duty is to report the reference during a mark pass via [`trace`].
///
/// [`trace`]: Value::trace
#[derive(Clone)]
pub struct Value {
    bits: u64,
    /// Present only for pointer-tagged values
    heap_ref: Option<HeapRef>,
}

impl Value {
    /// Create undefined
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
            heap_ref: None,
        }
    }

    /// Create null
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: TAG_NULL,
            heap_ref: None,
        }
    }

    /// Create the internal hole sentinel.
    ///
    /// Empty means "no value here" in slot and array storage; the
    /// protocol layer converts it before anything reaches script.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            bits: TAG_EMPTY,
            heap_ref: None,
        }
    }

    /// Create a boolean
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
            heap_ref: None,
        }
    }

    /// Create a 32-bit integer
    #[inline]
    pub fn int32(n: i32) -> Self {
        Self {
            bits: TAG_INT32 | (n as u32 as u64),
            heap_ref: None,
        }
    }

    /// Create a number, taking the integer fast path when the value is
    /// exactly representable (and not negative zero).
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return Self {
                bits: TAG_NAN,
                heap_ref: None,
            };
        }

        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || (1.0_f64 / n).is_sign_positive())
        {
            return Self::int32(n as i32);
        }

        Self {
            bits: n.to_bits(),
            heap_ref: None,
        }
    }

    /// Create canonical NaN
    #[inline]
    pub const fn nan() -> Self {
        Self {
            bits: TAG_NAN,
            heap_ref: None,
        }
    }

    /// Create a string value
    pub fn string(s: Arc<JsString>) -> Self {
        let ptr = Arc::as_ptr(&s) as u64;
        Self {
            bits: TAG_POINTER | (ptr & PAYLOAD_MASK),
            heap_ref: Some(HeapRef::String(s)),
        }
    }

    /// Create an object value
    pub fn object(obj: GcRef<JsObject>) -> Self {
        let ptr = obj.addr() as u64;
        Self {
            bits: TAG_POINTER | (ptr & PAYLOAD_MASK),
            heap_ref: Some(HeapRef::Object(obj)),
        }
    }

    /// Check for undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// Check for null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// Check for the internal hole sentinel
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == TAG_EMPTY
    }

    /// Check for null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.bits == TAG_UNDEFINED || self.bits == TAG_NULL
    }

    /// Check for a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.bits == TAG_TRUE || self.bits == TAG_FALSE
    }

    /// Check for an integer
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & 0xFFFF_FFFF_0000_0000) == TAG_INT32
    }

    /// Check for canonical NaN
    #[inline]
    pub fn is_nan(&self) -> bool {
        self.bits == TAG_NAN
    }

    /// Check for a double that is not on the integer fast path
    #[inline]
    pub fn is_double(&self) -> bool {
        self.bits == TAG_NAN || !self.is_nan_boxed()
    }

    /// Check for any number
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.is_double()
    }

    /// Check for a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::String(_)))
    }

    /// Check for an object
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Object(_)))
    }

    /// Check for any managed reference
    #[inline]
    pub fn is_managed(&self) -> bool {
        self.heap_ref.is_some()
    }

    /// Check for a callable object
    pub fn is_callable(&self) -> bool {
        self.as_object().map(|o| o.is_callable()).unwrap_or(false)
    }

    #[inline]
    fn is_nan_boxed(&self) -> bool {
        (self.bits & QUIET_NAN) == QUIET_NAN
    }

    /// Get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Get as 32-bit integer
    pub fn as_int32(&self) -> Option<i32> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32)
        } else {
            None
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32 as f64)
        } else if self.bits == TAG_NAN {
            Some(f64::NAN)
        } else if !self.is_nan_boxed() {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&GcRef<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self.bits {
            TAG_UNDEFINED | TAG_NULL | TAG_FALSE | TAG_NAN | TAG_EMPTY => false,
            TAG_TRUE => true,
            _ if self.is_int32() => (self.bits & 0xFFFF_FFFF) as i32 != 0,
            _ if !self.is_nan_boxed() => f64::from_bits(self.bits) != 0.0,
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => !s.is_empty(),
                _ => true,
            },
        }
    }

    /// typeof
    pub fn type_of(&self) -> &'static str {
        match self.bits {
            TAG_UNDEFINED | TAG_EMPTY => "undefined",
            TAG_NULL => "object",
            TAG_TRUE | TAG_FALSE => "boolean",
            _ if self.is_number() => "number",
            _ => match &self.heap_ref {
                Some(HeapRef::String(_)) => "string",
                Some(HeapRef::Object(o)) => {
                    if o.is_callable() {
                        "function"
                    } else {
                        "object"
                    }
                }
                None => "undefined",
            },
        }
    }

    /// SameValue: like strict equality, except NaN equals NaN and
    /// positive and negative zero differ. Used by the descriptor
    /// reconciliation algorithm.
    pub fn same_value(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            return a.to_bits() == b.to_bits();
        }
        match (&self.heap_ref, &other.heap_ref) {
            (Some(HeapRef::String(a)), Some(HeapRef::String(b))) => a == b,
            (Some(HeapRef::Object(a)), Some(HeapRef::Object(b))) => GcRef::ptr_eq(a, b),
            (None, None) => self.bits == other.bits,
            _ => false,
        }
    }

    /// Report the managed reference, if any, to a mark pass
    pub fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => {
                use marten_vm_gc::GcObject;
                tracer(s.header() as *const GcHeader);
            }
            Some(HeapRef::Object(o)) => tracer(o.header_ptr()),
            None => {}
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl PartialEq for Value {
    /// Strict equality (`===`), minus the NaN special case being
    /// handled via `as_number`.
    fn eq(&self, other: &Self) -> bool {
        if self.bits == TAG_NAN || other.bits == TAG_NAN {
            return false;
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        match (&self.heap_ref, &other.heap_ref) {
            (Some(HeapRef::String(a)), Some(HeapRef::String(b))) => a == b,
            (Some(HeapRef::Object(a)), Some(HeapRef::Object(b))) => GcRef::ptr_eq(a, b),
            (None, None) => self.bits == other.bits,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bits {
            TAG_UNDEFINED => write!(f, "undefined"),
            TAG_NULL => write!(f, "null"),
            TAG_TRUE => write!(f, "true"),
            TAG_FALSE => write!(f, "false"),
            TAG_EMPTY => write!(f, "<empty>"),
            _ if self.is_int32() => write!(f, "{}", (self.bits & 0xFFFF_FFFF) as i32),
            _ if self.is_double() => write!(f, "{}", self.as_number().unwrap_or(f64::NAN)),
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => write!(f, "{:?}", s.as_str()),
                Some(HeapRef::Object(_)) => write!(f, "[object]"),
                None => write!(f, "<unknown>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        assert!(Value::undefined().is_undefined());
        assert!(Value::null().is_null());
        assert!(Value::null().is_nullish());
        assert!(Value::empty().is_empty());
        assert!(!Value::undefined().is_empty());
        assert!(!Value::empty().to_boolean());
    }

    #[test]
    fn test_integer_fast_path() {
        let v = Value::number(42.0);
        assert!(v.is_int32());
        assert_eq!(v.as_int32(), Some(42));
        assert_eq!(v.as_number(), Some(42.0));

        // Negative zero must stay a double
        let nz = Value::number(-0.0);
        assert!(!nz.is_int32());
        assert!(nz.as_number().unwrap().is_sign_negative());

        // Out-of-range integers stay doubles
        let big = Value::number(1e10);
        assert!(!big.is_int32());
        assert_eq!(big.as_number(), Some(1e10));
    }

    #[test]
    fn test_nan_distinct_from_undefined() {
        let v = Value::number(f64::NAN);
        assert!(v.is_nan());
        assert!(v.is_number());
        assert!(!v.is_undefined());
        assert_eq!(v.type_of(), "number");
        assert_ne!(v, Value::nan()); // NaN !== NaN
    }

    #[test]
    fn test_same_value() {
        assert!(Value::nan().same_value(&Value::nan()));
        assert!(!Value::number(0.0).same_value(&Value::number(-0.0)));
        assert!(Value::number(1.0).same_value(&Value::int32(1)));
        assert!(Value::undefined().same_value(&Value::undefined()));
        assert!(!Value::undefined().same_value(&Value::null()));
    }

    #[test]
    fn test_string_values() {
        let s = Arc::new(crate::string::JsString::new("hi"));
        let v = Value::string(Arc::clone(&s));
        assert!(v.is_string());
        assert!(v.is_managed());
        assert_eq!(v.type_of(), "string");
        assert!(v.to_boolean());

        let empty = Value::string(Arc::new(crate::string::JsString::new("")));
        assert!(!empty.to_boolean());
    }
}
