//! Value-level runtime entry points
//!
//! The operations an interpreter or embedder calls with plain values:
//! property access on arbitrary bases, calling and constructing, and
//! the abstract conversions. Accessing a property of null or undefined
//! is the one place a data access raises an exception on its own.

use crate::context::CallContext;
use crate::engine::ExecutionEngine;
use crate::error::VmResult;
use crate::gc::GcRef;
use crate::identifier::PropertyName;
use crate::object::JsObject;
use crate::string::JsString;
use crate::value::Value;
use std::sync::Arc;

/// Everything a native function receives about its invocation
pub struct CallData {
    /// The activation of this call
    pub context: Arc<CallContext>,
}

impl CallData {
    /// The `this` binding
    pub fn this_value(&self) -> &Value {
        self.context.this_value()
    }

    /// Arguments as passed
    pub fn args(&self) -> &[Value] {
        self.context.args()
    }

    /// Argument `i`, or undefined past the end
    pub fn argument(&self, i: usize) -> Value {
        self.context
            .args()
            .get(i)
            .cloned()
            .unwrap_or_else(Value::undefined)
    }

    /// Call-site argument count
    pub fn arg_count(&self) -> usize {
        self.context.arg_count()
    }
}

/// `base[name]` for an arbitrary base value
pub fn get_property(
    engine: &ExecutionEngine,
    base: &Value,
    name: &PropertyName,
) -> VmResult<Value> {
    if base.is_nullish() {
        return Err(engine.throw_type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            if base.is_null() { "null" } else { "undefined" },
            name
        )));
    }

    // Primitive string fast path: length and in-range indices need no
    // wrapper allocation.
    if let Some(s) = base.as_string() {
        match name {
            PropertyName::Index(i) => {
                if let Some(c) = s.char_string_at(*i as usize) {
                    return Ok(Value::string(Arc::new(JsString::new(c))));
                }
            }
            PropertyName::Ident(id) => {
                if *id == engine.well_known().length {
                    return Ok(Value::int32(s.len_utf16() as i32));
                }
            }
        }
    }

    let obj = to_object(engine, base)?;
    match name {
        PropertyName::Ident(id) => obj.get(engine, id, base),
        PropertyName::Index(i) => obj.get_indexed(engine, *i, base),
    }
}

/// `base[name] = value` for an arbitrary base value. `Ok(false)` is
/// the quiet rejection; strict callers escalate it.
pub fn put_property(
    engine: &ExecutionEngine,
    base: &Value,
    name: &PropertyName,
    value: Value,
) -> VmResult<bool> {
    if base.is_nullish() {
        return Err(engine.throw_type_error(format!(
            "Cannot set properties of {} (setting '{}')",
            if base.is_null() { "null" } else { "undefined" },
            name
        )));
    }
    let Some(obj) = base.as_object() else {
        // Writes to primitive wrappers evaporate
        return Ok(false);
    };
    match name {
        PropertyName::Ident(id) => obj.put(engine, id, value, base),
        PropertyName::Index(i) => obj.put_indexed(engine, *i, value, base),
    }
}

/// `base(args...)` with an explicit `this`
pub fn call_value(
    engine: &ExecutionEngine,
    func: &Value,
    this: Value,
    args: Vec<Value>,
) -> VmResult<Value> {
    engine.call_function(func, this, args)
}

/// `new base(args...)`
pub fn construct_value(
    engine: &ExecutionEngine,
    func: &Value,
    args: Vec<Value>,
) -> VmResult<Value> {
    engine.construct(func, args)
}

/// ToObject: wrap primitives, reject null and undefined
pub fn to_object(engine: &ExecutionEngine, value: &Value) -> VmResult<GcRef<JsObject>> {
    if let Some(obj) = value.as_object() {
        return Ok(obj.clone());
    }
    if let Some(s) = value.as_string() {
        return Ok(engine.new_string_object(Arc::clone(s)));
    }
    if let Some(n) = value.as_number() {
        return Ok(engine.new_number_object(n));
    }
    if let Some(b) = value.as_boolean() {
        return Ok(engine.new_boolean_object(b));
    }
    Err(engine.throw_type_error("Cannot convert undefined or null to object"))
}

/// The sloppy-mode `this` coercion: null and undefined become the
/// global object, primitives get wrapped.
pub fn convert_this_to_object(engine: &ExecutionEngine, this: &Value) -> VmResult<Value> {
    if this.is_nullish() {
        return Ok(Value::object(engine.global_object()));
    }
    if this.is_object() {
        return Ok(this.clone());
    }
    to_object(engine, this).map(Value::object)
}

/// ToNumber
pub fn to_number(engine: &ExecutionEngine, value: &Value) -> VmResult<f64> {
    if let Some(n) = value.as_number() {
        return Ok(n);
    }
    if value.is_undefined() {
        return Ok(f64::NAN);
    }
    if value.is_null() {
        return Ok(0.0);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(if b { 1.0 } else { 0.0 });
    }
    if let Some(s) = value.as_string() {
        return Ok(string_to_number(s.as_str()));
    }
    let primitive = to_primitive(engine, value, PreferredType::Number)?;
    to_number(engine, &primitive)
}

/// ToString
pub fn to_string(engine: &ExecutionEngine, value: &Value) -> VmResult<Arc<JsString>> {
    if let Some(s) = value.as_string() {
        return Ok(Arc::clone(s));
    }
    if value.is_undefined() {
        return Ok(engine.intern("undefined"));
    }
    if value.is_null() {
        return Ok(engine.intern("null"));
    }
    if let Some(b) = value.as_boolean() {
        return Ok(engine.intern(if b { "true" } else { "false" }));
    }
    if let Some(i) = value.as_int32() {
        let mut buf = itoa::Buffer::new();
        return Ok(engine.intern(buf.format(i)));
    }
    if let Some(n) = value.as_number() {
        return Ok(engine.intern(&number_to_string(n)));
    }
    let primitive = to_primitive(engine, value, PreferredType::String)?;
    to_string(engine, &primitive)
}

/// ToPropertyKey: canonical indices stay integer keys
pub fn to_property_key(engine: &ExecutionEngine, value: &Value) -> VmResult<PropertyName> {
    if let Some(i) = value.as_int32() {
        if i >= 0 {
            return Ok(PropertyName::Index(i as u32));
        }
    }
    let s = to_string(engine, value)?;
    Ok(engine.identifiers().property_name(s.as_str()))
}

/// ToUint32: modular wrap of the numeric value
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() % 4294967296.0;
    if m < 0.0 {
        (m + 4294967296.0) as u32
    } else {
        m as u32
    }
}

/// Preference passed to ToPrimitive
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// valueOf first
    Number,
    /// toString first
    String,
}

/// ToPrimitive over an object: try valueOf/toString in hint order
pub fn to_primitive(
    engine: &ExecutionEngine,
    value: &Value,
    hint: PreferredType,
) -> VmResult<Value> {
    let Some(obj) = value.as_object() else {
        return Ok(value.clone());
    };
    let wk = engine.well_known();
    let order = match hint {
        PreferredType::Number => [&wk.value_of, &wk.to_string],
        PreferredType::String => [&wk.to_string, &wk.value_of],
    };
    for name in order {
        let method = obj.get(engine, name, value)?;
        if method.is_callable() {
            let result = engine.call_function(&method, value.clone(), Vec::new())?;
            if !result.is_object() {
                return Ok(result);
            }
        }
    }
    Err(engine.throw_type_error("Cannot convert object to primitive value"))
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Script-visible decimal form of a double. Integral values in the
/// safe range print without a fraction; everything else takes the
/// shortest round-trip form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    let mut buf = ryu::Buffer::new();
    let formatted = buf.format(n);
    match formatted.find('e') {
        // Exponent forms need an explicit sign
        Some(pos) if !formatted[pos + 1..].starts_with('-') => {
            format!("{}e+{}", &formatted[..pos], &formatted[pos + 1..])
        }
        _ => formatted.to_string(),
    }
}
