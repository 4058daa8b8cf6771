//! Objects and the uniform property protocol
//!
//! Every script object is a [`JsObject`]: a class pointer describing
//! the named-property layout, a slot array holding the values, and
//! optional indexed element storage. Behavioral variation between the
//! closed set of object kinds (arrays, wrappers, functions, the
//! arguments object) lives in [`ObjectKind`] and is dispatched by
//! matching, not by per-object function tables.
//!
//! The protocol convention: `Err` is an engine exception in flight,
//! `Ok(false)` is the quiet "did not happen" that non-strict code
//! swallows and strict code turns into a TypeError.

use crate::array_data::ArrayData;
use crate::context::CallContext;
use crate::engine::ExecutionEngine;
use crate::error::{VmError, VmResult};
use crate::gc::GcRef;
use crate::identifier::{Identifier, PropertyName};
use crate::internal_class::{DispatchKind, InternalClass};
use crate::property::{PropertyAttributes, PropertyDescriptor};
use crate::runtime::CallData;
use crate::string::JsString;
use crate::value::Value;
use marten_vm_gc::object::tags;
use marten_vm_gc::{GcHeader, GcObject};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Signature of a native function implementation
pub type NativeFn = dyn Fn(&ExecutionEngine, &CallData) -> VmResult<Value> + Send + Sync;

/// Payload of a function object
pub struct FunctionData {
    /// Function name, surfaced as the `name` property
    pub name: String,
    /// Declared parameter count, surfaced as `length`
    pub formal_count: u32,
    /// The implementation
    pub func: Arc<NativeFn>,
}

/// Array length bookkeeping: the length can exceed the highest stored
/// index, and `Object.defineProperty` can clear its writability.
pub struct ArrayLength {
    /// Current length
    pub len: u32,
    /// Whether plain assignment may change it
    pub writable: bool,
}

/// Payload of an arguments object.
///
/// While an index is mapped, reads and writes flow through to the
/// corresponding local of the activation; deletion or redefinition
/// severs the link for that index only.
pub struct ArgumentsData {
    /// The activation whose parameters are aliased
    pub context: Arc<CallContext>,
    mapped: RwLock<Vec<bool>>,
}

impl ArgumentsData {
    /// Alias the first `mapped_count` indices to the activation
    pub fn new(context: Arc<CallContext>, mapped_count: usize) -> Self {
        Self {
            context,
            mapped: RwLock::new(vec![true; mapped_count]),
        }
    }

    fn is_mapped(&self, index: u32) -> bool {
        self.mapped
            .read()
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn sever(&self, index: u32) {
        if let Some(flag) = self.mapped.write().get_mut(index as usize) {
            *flag = false;
        }
    }
}

/// Kind payload of an object, one variant per member of the closed
/// kind set
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Array exotic object
    Array(RwLock<ArrayLength>),
    /// String wrapper around an immutable string
    String(Arc<JsString>),
    /// Number wrapper
    Number(f64),
    /// Boolean wrapper
    Boolean(bool),
    /// Date, holding its time value in milliseconds
    Date(RwLock<f64>),
    /// Callable function
    Function(FunctionData),
    /// Arguments object of a call
    Arguments(ArgumentsData),
}

impl ObjectKind {
    /// The matching dispatch selector
    pub fn dispatch(&self) -> DispatchKind {
        match self {
            Self::Ordinary => DispatchKind::Ordinary,
            Self::Array(_) => DispatchKind::Array,
            Self::String(_) => DispatchKind::String,
            Self::Number(_) => DispatchKind::Number,
            Self::Boolean(_) => DispatchKind::Boolean,
            Self::Date(_) => DispatchKind::Date,
            Self::Function(_) => DispatchKind::Function,
            Self::Arguments(_) => DispatchKind::Arguments,
        }
    }

    fn gc_tag(&self) -> u8 {
        match self {
            Self::Ordinary => tags::OBJECT,
            Self::Array(_) => tags::ARRAY,
            Self::String(_) => tags::STRING_OBJECT,
            Self::Number(_) => tags::NUMBER_OBJECT,
            Self::Boolean(_) => tags::BOOLEAN_OBJECT,
            Self::Date(_) => tags::DATE_OBJECT,
            Self::Function(_) => tags::FUNCTION_OBJECT,
            Self::Arguments(_) => tags::ARGUMENTS_OBJECT,
        }
    }
}

/// A script object
pub struct JsObject {
    header: GcHeader,
    class: RwLock<Arc<InternalClass>>,
    slots: RwLock<Vec<Value>>,
    elements: RwLock<Option<ArrayData>>,
    /// Setters of indexed accessor properties; the getter sits in the
    /// element storage under an ACCESSOR attribute
    indexed_setters: RwLock<FxHashMap<u32, Value>>,
    kind: ObjectKind,
}

impl JsObject {
    /// Create an object of the given class and kind. The class's
    /// dispatch kind must match; the engine's constructors guarantee
    /// it.
    pub fn new(class: Arc<InternalClass>, kind: ObjectKind) -> Self {
        debug_assert_eq!(class.kind(), kind.dispatch());
        let slots = vec![Value::undefined(); class.size()];
        Self {
            header: GcHeader::new(kind.gc_tag()),
            class: RwLock::new(class),
            slots: RwLock::new(slots),
            elements: RwLock::new(None),
            indexed_setters: RwLock::new(FxHashMap::default()),
            kind,
        }
    }

    /// The kind payload
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// The current class
    pub fn class(&self) -> Arc<InternalClass> {
        Arc::clone(&self.class.read())
    }

    /// The prototype, from the class
    pub fn prototype(&self) -> Option<GcRef<JsObject>> {
        self.class.read().prototype().cloned()
    }

    /// Replace the prototype (a class transition)
    pub fn set_prototype(&self, proto: Option<GcRef<JsObject>>) -> bool {
        if !self.header.is_extensible() {
            let same = match (&proto, self.prototype()) {
                (None, None) => true,
                (Some(a), Some(b)) => GcRef::ptr_eq(a, &b),
                _ => false,
            };
            return same;
        }
        let class = self.class();
        *self.class.write() = class.change_prototype(proto);
        true
    }

    /// Whether new properties may be added
    pub fn is_extensible(&self) -> bool {
        self.header.is_extensible()
    }

    /// Permanently forbid adding properties
    pub fn prevent_extensions(&self) {
        self.header.clear_extensible();
    }

    /// Whether the object is callable
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// The native function payload, for callable objects
    pub fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Current array length; zero for non-arrays
    pub fn array_length(&self) -> u32 {
        match &self.kind {
            ObjectKind::Array(meta) => meta.read().len,
            _ => 0,
        }
    }

    /// Set the array length, truncating stored elements. Returns false
    /// when the length is not writable or a non-configurable element
    /// stopped the truncation short (the length still drops as far as
    /// it can).
    pub fn set_array_length(&self, new_len: u32) -> bool {
        let ObjectKind::Array(meta) = &self.kind else {
            return false;
        };
        let mut meta = meta.write();
        if new_len == meta.len {
            return true;
        }
        if !meta.writable {
            return false;
        }
        if new_len < meta.len {
            let achieved = self
                .elements
                .write()
                .as_mut()
                .map(|e| e.truncate(new_len))
                .unwrap_or(new_len);
            let achieved = achieved.max(new_len);
            meta.len = achieved;
            return achieved == new_len;
        }
        meta.len = new_len;
        true
    }

    fn with_elements_mut<R>(&self, f: impl FnOnce(&mut ArrayData) -> R) -> R {
        let mut guard = self.elements.write();
        f(guard.get_or_insert_with(ArrayData::new))
    }

    // ---- named properties ----------------------------------------

    /// Own slot and attributes of `name`, ignoring synthesized
    /// properties
    fn own_member(&self, name: &Identifier) -> Option<(usize, PropertyAttributes)> {
        let class = self.class.read();
        let slot = class.find(name)?;
        Some((slot, class.attributes_at(slot)))
    }

    fn slot_value(&self, slot: usize) -> Value {
        self.slots.read()[slot].clone()
    }

    /// Direct slot read for callers that have verified the class,
    /// like a hit in an inline cache.
    pub fn raw_slot(&self, slot: usize) -> Value {
        self.slot_value(slot)
    }

    /// Direct slot write, same contract as [`raw_slot`].
    ///
    /// [`raw_slot`]: Self::raw_slot
    pub fn set_raw_slot(&self, slot: usize, value: Value) {
        self.slots.write()[slot] = value;
    }

    /// [[Get]]. `receiver` is the value accessors see as `this`; for a
    /// plain access it is the object itself.
    pub fn get(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
        receiver: &Value,
    ) -> VmResult<Value> {
        if let Some(v) = self.get_own(engine, name, receiver)? {
            return Ok(v);
        }
        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(v) = p.get_own(engine, name, receiver)? {
                return Ok(v);
            }
            proto = p.prototype();
        }
        Ok(Value::undefined())
    }

    fn get_own(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
        receiver: &Value,
    ) -> VmResult<Option<Value>> {
        if let Some(v) = self.synthesized_named(engine, name) {
            return Ok(Some(v));
        }
        let Some((slot, attrs)) = self.own_member(name) else {
            return Ok(None);
        };
        if attrs.is_accessor() {
            let getter = self.slot_value(slot);
            if getter.is_undefined() {
                return Ok(Some(Value::undefined()));
            }
            return engine
                .call_function(&getter, receiver.clone(), Vec::new())
                .map(Some);
        }
        Ok(Some(self.slot_value(slot)))
    }

    fn synthesized_named(&self, engine: &ExecutionEngine, name: &Identifier) -> Option<Value> {
        match &self.kind {
            ObjectKind::Array(meta) if *name == engine.well_known().length => {
                let len = meta.read().len;
                Some(length_value(len))
            }
            ObjectKind::String(s) if *name == engine.well_known().length => {
                Some(length_value(s.len_utf16() as u32))
            }
            _ => None,
        }
    }

    fn synthesized_named_attrs(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
    ) -> Option<PropertyAttributes> {
        match &self.kind {
            ObjectKind::Array(meta) if *name == engine.well_known().length => {
                if meta.read().writable {
                    Some(PropertyAttributes::WRITABLE)
                } else {
                    Some(PropertyAttributes::empty())
                }
            }
            ObjectKind::String(_) if *name == engine.well_known().length => {
                Some(PropertyAttributes::empty())
            }
            _ => None,
        }
    }

    /// [[Set]]. `Ok(false)` is a rejection the caller may escalate to
    /// a TypeError in strict code.
    pub fn put(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
        value: Value,
        receiver: &Value,
    ) -> VmResult<bool> {
        // Array length assignment routes through truncation
        if let ObjectKind::Array(_) = &self.kind {
            if *name == engine.well_known().length {
                let Some(n) = value.as_number() else {
                    return Err(VmError::range_error("Invalid array length"));
                };
                let len = n as u32;
                if len as f64 != n {
                    return Err(VmError::range_error("Invalid array length"));
                }
                return Ok(self.set_array_length(len));
            }
        }
        if self.synthesized_named_attrs(engine, name).is_some() {
            return Ok(false); // String length is read-only
        }

        if let Some((slot, attrs)) = self.own_member(name) {
            if attrs.is_accessor() {
                let setter = self.slot_value(slot + 1);
                if !setter.is_callable() {
                    return Ok(false);
                }
                engine.call_function(&setter, receiver.clone(), vec![value])?;
                return Ok(true);
            }
            if !attrs.is_writable() {
                return Ok(false);
            }
            self.slots.write()[slot] = value;
            return Ok(true);
        }

        // Consult the chain before creating: an inherited accessor or
        // read-only data property intercepts the write.
        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(attrs) = p.synthesized_named_attrs(engine, name) {
                if !attrs.is_writable() {
                    return Ok(false);
                }
                break;
            }
            if let Some((slot, attrs)) = p.own_member(name) {
                if attrs.is_accessor() {
                    let setter = p.slot_value(slot + 1);
                    if !setter.is_callable() {
                        return Ok(false);
                    }
                    engine.call_function(&setter, receiver.clone(), vec![value])?;
                    return Ok(true);
                }
                if !attrs.is_writable() {
                    return Ok(false);
                }
                break;
            }
            proto = p.prototype();
        }

        if !self.header.is_extensible() {
            return Ok(false);
        }
        self.insert_member(name, value, PropertyAttributes::default_data());
        Ok(true)
    }

    /// Create or overwrite an own data property without protocol
    /// checks. Engine setup code uses this to populate builtins.
    pub fn insert_member(&self, name: &Identifier, value: Value, attrs: PropertyAttributes) {
        debug_assert!(attrs.is_data());
        let class = self.class();
        if class.find(name).is_some() {
            let (new_class, slot) = class.change_member(name, attrs);
            self.apply_class(new_class);
            self.slots.write()[slot] = value;
            return;
        }
        let (new_class, slot) = class.add_member(name, attrs);
        self.apply_class(new_class);
        self.slots.write()[slot] = value;
    }

    /// Create or overwrite an own accessor property
    pub fn insert_accessor(
        &self,
        name: &Identifier,
        getter: Value,
        setter: Value,
        attrs: PropertyAttributes,
    ) {
        debug_assert!(attrs.is_accessor());
        let class = self.class();
        let (new_class, slot) = if class.find(name).is_some() {
            class.change_member(name, attrs)
        } else {
            class.add_member(name, attrs)
        };
        self.apply_class(new_class);
        let mut slots = self.slots.write();
        slots[slot] = getter;
        slots[slot + 1] = setter;
    }

    /// Swap in a new class, remapping slot storage by member name so
    /// values survive layout shifts.
    fn apply_class(&self, new_class: Arc<InternalClass>) {
        let old_class = self.class();
        if Arc::ptr_eq(&old_class, &new_class) {
            return;
        }
        let mut slots = self.slots.write();
        if new_class.size() >= old_class.size() && same_prefix(&old_class, &new_class) {
            slots.resize(new_class.size(), Value::undefined());
        } else {
            let mut remapped = vec![Value::undefined(); new_class.size()];
            for (i, member) in new_class.members().iter().enumerate() {
                let Some(name) = &member.name else { continue };
                if let Some(old_slot) = old_class.find(name) {
                    remapped[i] = slots[old_slot].clone();
                    if member.attrs.is_accessor()
                        && old_class.attributes_at(old_slot).is_accessor()
                    {
                        remapped[i + 1] = slots[old_slot + 1].clone();
                    }
                }
            }
            *slots = remapped;
        }
        drop(slots);
        *self.class.write() = new_class;
    }

    /// Own attributes of `name`, including synthesized properties
    pub fn query_own(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
    ) -> Option<PropertyAttributes> {
        if let Some(attrs) = self.synthesized_named_attrs(engine, name) {
            return Some(attrs);
        }
        self.own_member(name).map(|(_, attrs)| attrs)
    }

    /// Attributes of `name` along the prototype chain
    pub fn query(&self, engine: &ExecutionEngine, name: &Identifier) -> Option<PropertyAttributes> {
        if let Some(attrs) = self.query_own(engine, name) {
            return Some(attrs);
        }
        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(attrs) = p.query_own(engine, name) {
                return Some(attrs);
            }
            proto = p.prototype();
        }
        None
    }

    /// [[Delete]]. Deleting an absent property succeeds.
    pub fn delete_property(&self, engine: &ExecutionEngine, name: &Identifier) -> bool {
        if self.synthesized_named_attrs(engine, name).is_some() {
            return false;
        }
        let Some((_, attrs)) = self.own_member(name) else {
            return true;
        };
        if !attrs.is_configurable() {
            return false;
        }
        let class = self.class();
        self.apply_class(class.remove_member(name));
        true
    }

    /// Own descriptor of `name`, fully populated
    pub fn own_property_descriptor(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
    ) -> Option<PropertyDescriptor> {
        if let Some(attrs) = self.synthesized_named_attrs(engine, name) {
            let value = self.synthesized_named(engine, name)?;
            let mut desc = PropertyDescriptor::data_with_attrs(value, attrs);
            desc.complete();
            return Some(desc);
        }
        let (slot, attrs) = self.own_member(name)?;
        Some(self.descriptor_from_slot(slot, attrs))
    }

    fn descriptor_from_slot(&self, slot: usize, attrs: PropertyAttributes) -> PropertyDescriptor {
        let mut desc = if attrs.is_accessor() {
            PropertyDescriptor {
                get: Some(self.slot_value(slot)),
                set: Some(self.slot_value(slot + 1)),
                ..Default::default()
            }
        } else {
            PropertyDescriptor {
                value: Some(self.slot_value(slot)),
                writable: Some(attrs.is_writable()),
                ..Default::default()
            }
        };
        desc.enumerable = Some(attrs.is_enumerable());
        desc.configurable = Some(attrs.is_configurable());
        desc.complete();
        desc
    }

    /// [[DefineOwnProperty]] for a named property
    pub fn define_own_property(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
        desc: &PropertyDescriptor,
    ) -> VmResult<bool> {
        // Array length redefinition: value changes truncate, writable
        // may be cleared, everything else is locked down.
        if let ObjectKind::Array(meta) = &self.kind {
            if *name == engine.well_known().length {
                if desc.is_accessor()
                    || desc.configurable == Some(true)
                    || desc.enumerable == Some(true)
                {
                    return Ok(false);
                }
                if desc.writable == Some(true) && !meta.read().writable {
                    return Ok(false);
                }
                let mut ok = true;
                if let Some(value) = &desc.value {
                    let Some(n) = value.as_number() else {
                        return Err(VmError::range_error("Invalid array length"));
                    };
                    let len = n as u32;
                    if len as f64 != n {
                        return Err(VmError::range_error("Invalid array length"));
                    }
                    ok = self.set_array_length(len);
                }
                if desc.writable == Some(false) {
                    meta.write().writable = false;
                }
                return Ok(ok);
            }
        }
        if let Some(current) = self
            .synthesized_named_attrs(engine, name)
            .and(self.own_property_descriptor(engine, name))
        {
            return Ok(desc.changes_nothing(&current));
        }

        let Some((_, _)) = self.own_member(name) else {
            if !self.header.is_extensible() {
                return Ok(false);
            }
            let mut complete = desc.clone();
            complete.complete();
            let attrs = complete.resolved_attributes();
            if complete.is_accessor() {
                self.insert_accessor(
                    name,
                    complete.get.unwrap_or_else(Value::undefined),
                    complete.set.unwrap_or_else(Value::undefined),
                    attrs,
                );
            } else {
                self.insert_member(
                    name,
                    complete.value.unwrap_or_else(Value::undefined),
                    attrs,
                );
            }
            return Ok(true);
        };

        let current = self
            .own_property_descriptor(engine, name)
            .unwrap_or_default();
        if desc.changes_nothing(&current) {
            return Ok(true);
        }
        if !desc.can_replace(&current) {
            return Ok(false);
        }

        let merged = desc.merge_over(&current);
        let attrs = merged.resolved_attributes();
        if merged.get.is_some() || merged.set.is_some() {
            self.insert_accessor(
                name,
                merged.get.unwrap_or_else(Value::undefined),
                merged.set.unwrap_or_else(Value::undefined),
                attrs | PropertyAttributes::ACCESSOR,
            );
        } else {
            self.insert_member(name, merged.value.unwrap_or_else(Value::undefined), attrs);
        }
        Ok(true)
    }

    // ---- indexed properties --------------------------------------

    fn synthesized_indexed(&self, index: u32) -> Option<Value> {
        match &self.kind {
            ObjectKind::String(s) => s
                .char_string_at(index as usize)
                .map(|c| Value::string(Arc::new(JsString::new(c)))),
            ObjectKind::Arguments(a) if a.is_mapped(index) => {
                Some(a.context.local(index as usize))
            }
            _ => None,
        }
    }

    fn synthesized_indexed_attrs(&self, index: u32) -> Option<PropertyAttributes> {
        match &self.kind {
            ObjectKind::String(s) if (index as usize) < s.len_utf16() => {
                Some(PropertyAttributes::ENUMERABLE)
            }
            ObjectKind::Arguments(a) if a.is_mapped(index) => {
                Some(PropertyAttributes::default_data())
            }
            _ => None,
        }
    }

    /// [[Get]] for an indexed property
    pub fn get_indexed(
        &self,
        engine: &ExecutionEngine,
        index: u32,
        receiver: &Value,
    ) -> VmResult<Value> {
        if let Some(v) = self.get_own_indexed(engine, index, receiver)? {
            return Ok(v);
        }
        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(v) = p.get_own_indexed(engine, index, receiver)? {
                return Ok(v);
            }
            proto = p.prototype();
        }
        Ok(Value::undefined())
    }

    fn get_own_indexed(
        &self,
        engine: &ExecutionEngine,
        index: u32,
        receiver: &Value,
    ) -> VmResult<Option<Value>> {
        if let Some(v) = self.synthesized_indexed(index) {
            return Ok(Some(v));
        }
        let (value, attrs) = {
            let guard = self.elements.read();
            let Some(elements) = guard.as_ref() else {
                return Ok(None);
            };
            match elements.get(index) {
                Some(v) => (v, elements.attribute(index).unwrap_or_default()),
                None => return Ok(None),
            }
        };
        if attrs.is_accessor() {
            if value.is_undefined() {
                return Ok(Some(Value::undefined()));
            }
            return engine
                .call_function(&value, receiver.clone(), Vec::new())
                .map(Some);
        }
        Ok(Some(value))
    }

    /// [[Set]] for an indexed property
    pub fn put_indexed(
        &self,
        engine: &ExecutionEngine,
        index: u32,
        value: Value,
        receiver: &Value,
    ) -> VmResult<bool> {
        if let ObjectKind::Arguments(a) = &self.kind {
            if a.is_mapped(index) {
                a.context.set_local(index as usize, value);
                return Ok(true);
            }
        }
        if let ObjectKind::String(s) = &self.kind {
            if (index as usize) < s.len_utf16() {
                return Ok(false);
            }
        }

        let own = self
            .elements
            .read()
            .as_ref()
            .and_then(|e| e.attribute(index));
        if let Some(attrs) = own {
            if attrs.is_accessor() {
                let setter = self.indexed_setters.read().get(&index).cloned();
                let Some(setter) = setter.filter(Value::is_callable) else {
                    return Ok(false);
                };
                engine.call_function(&setter, receiver.clone(), vec![value])?;
                return Ok(true);
            }
            if !attrs.is_writable() {
                return Ok(false);
            }
            self.with_elements_mut(|e| e.put_with_attrs(index, value, Some(attrs)));
            return Ok(true);
        }

        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(attrs) = p.synthesized_indexed_attrs(index) {
                if !attrs.is_writable() {
                    return Ok(false);
                }
                break;
            }
            let inherited = p.elements.read().as_ref().and_then(|e| e.attribute(index));
            if let Some(attrs) = inherited {
                if attrs.is_accessor() {
                    let setter = p.indexed_setters.read().get(&index).cloned();
                    let Some(setter) = setter.filter(Value::is_callable) else {
                        return Ok(false);
                    };
                    engine.call_function(&setter, receiver.clone(), vec![value])?;
                    return Ok(true);
                }
                if !attrs.is_writable() {
                    return Ok(false);
                }
                break;
            }
            proto = p.prototype();
        }

        if !self.header.is_extensible() {
            return Ok(false);
        }
        if let ObjectKind::Array(meta) = &self.kind {
            let needs_growth = index >= meta.read().len;
            if needs_growth {
                if !meta.read().writable {
                    return Ok(false);
                }
                self.with_elements_mut(|e| e.put(index, value));
                meta.write().len = index + 1;
                return Ok(true);
            }
        }
        self.with_elements_mut(|e| e.put(index, value));
        Ok(true)
    }

    /// Own attributes of an indexed property
    pub fn query_own_indexed(&self, index: u32) -> Option<PropertyAttributes> {
        if let Some(attrs) = self.synthesized_indexed_attrs(index) {
            return Some(attrs);
        }
        self.elements.read().as_ref().and_then(|e| e.attribute(index))
    }

    /// Attributes of an indexed property along the prototype chain
    pub fn query_indexed(&self, index: u32) -> Option<PropertyAttributes> {
        if let Some(attrs) = self.query_own_indexed(index) {
            return Some(attrs);
        }
        let mut proto = self.prototype();
        while let Some(p) = proto {
            if let Some(attrs) = p.query_own_indexed(index) {
                return Some(attrs);
            }
            proto = p.prototype();
        }
        None
    }

    /// [[Delete]] for an indexed property
    pub fn delete_indexed(&self, index: u32) -> bool {
        match &self.kind {
            ObjectKind::String(s) if (index as usize) < s.len_utf16() => return false,
            ObjectKind::Arguments(a) if a.is_mapped(index) => {
                // Severing first keeps the element storage consistent
                // if the delete turns out to be blocked.
                let v = a.context.local(index as usize);
                self.with_elements_mut(|e| e.put(index, v));
                a.sever(index);
            }
            _ => {}
        }
        let deleted = self
            .elements
            .write()
            .as_mut()
            .map(|e| e.del(index))
            .unwrap_or(true);
        if deleted {
            self.indexed_setters.write().remove(&index);
        }
        deleted
    }

    /// Own descriptor of an indexed property, fully populated
    pub fn own_indexed_descriptor(&self, index: u32) -> Option<PropertyDescriptor> {
        if let ObjectKind::Arguments(a) = &self.kind {
            if a.is_mapped(index) {
                let mut desc = PropertyDescriptor::data(a.context.local(index as usize));
                desc.complete();
                return Some(desc);
            }
        }
        if let ObjectKind::String(s) = &self.kind {
            if let Some(c) = s.char_string_at(index as usize) {
                let mut desc = PropertyDescriptor::data_with_attrs(
                    Value::string(Arc::new(JsString::new(c))),
                    PropertyAttributes::ENUMERABLE,
                );
                desc.complete();
                return Some(desc);
            }
        }
        let guard = self.elements.read();
        let elements = guard.as_ref()?;
        let value = elements.get(index)?;
        let attrs = elements.attribute(index)?;
        let mut desc = if attrs.is_accessor() {
            PropertyDescriptor {
                get: Some(value),
                set: Some(
                    self.indexed_setters
                        .read()
                        .get(&index)
                        .cloned()
                        .unwrap_or_else(Value::undefined),
                ),
                ..Default::default()
            }
        } else {
            PropertyDescriptor {
                value: Some(value),
                writable: Some(attrs.is_writable()),
                ..Default::default()
            }
        };
        desc.enumerable = Some(attrs.is_enumerable());
        desc.configurable = Some(attrs.is_configurable());
        desc.complete();
        Some(desc)
    }

    /// [[DefineOwnProperty]] for an indexed property
    pub fn define_own_property_indexed(
        &self,
        index: u32,
        desc: &PropertyDescriptor,
    ) -> VmResult<bool> {
        match &self.kind {
            ObjectKind::String(s) if (index as usize) < s.len_utf16() => {
                let current = self.own_indexed_descriptor(index).unwrap_or_default();
                return Ok(desc.changes_nothing(&current));
            }
            ObjectKind::Arguments(a) if a.is_mapped(index) => {
                // Redefinition severs the parameter alias; the last
                // aliased value becomes the stored one.
                let v = a.context.local(index as usize);
                self.with_elements_mut(|e| e.put(index, v));
                a.sever(index);
            }
            _ => {}
        }

        let current = self.own_indexed_descriptor(index);
        let Some(current) = current else {
            if !self.header.is_extensible() {
                return Ok(false);
            }
            if let ObjectKind::Array(meta) = &self.kind {
                if index >= meta.read().len {
                    if !meta.read().writable {
                        return Ok(false);
                    }
                    meta.write().len = index + 1;
                }
            }
            let mut complete = desc.clone();
            complete.complete();
            self.store_indexed_descriptor(index, &complete);
            return Ok(true);
        };

        if desc.changes_nothing(&current) {
            return Ok(true);
        }
        if !desc.can_replace(&current) {
            return Ok(false);
        }
        let merged = desc.merge_over(&current);
        self.store_indexed_descriptor(index, &merged);
        Ok(true)
    }

    fn store_indexed_descriptor(&self, index: u32, desc: &PropertyDescriptor) {
        let attrs = desc.resolved_attributes();
        if desc.get.is_some() || desc.set.is_some() {
            let getter = desc.get.clone().unwrap_or_else(Value::undefined);
            let setter = desc.set.clone().unwrap_or_else(Value::undefined);
            self.with_elements_mut(|e| {
                e.put_with_attrs(index, getter, Some(attrs | PropertyAttributes::ACCESSOR))
            });
            self.indexed_setters.write().insert(index, setter);
        } else {
            let value = desc.value.clone().unwrap_or_else(Value::undefined);
            self.with_elements_mut(|e| e.put_with_attrs(index, value, Some(attrs)));
            self.indexed_setters.write().remove(&index);
        }
    }

    // ---- enumeration ---------------------------------------------

    /// Own keys in protocol order: indices ascending, then named
    /// members in insertion order. Synthesized names (the Array and
    /// String `length`) come before the stored members, matching their
    /// creation order. Set `enumerable_only` for the for-in view.
    pub fn own_property_keys(
        &self,
        engine: &ExecutionEngine,
        enumerable_only: bool,
    ) -> Vec<PropertyName> {
        let mut keys = Vec::new();

        let mut indices: BTreeSet<u32> = BTreeSet::new();
        match &self.kind {
            ObjectKind::String(s) => {
                indices.extend(0..s.len_utf16() as u32);
            }
            ObjectKind::Arguments(a) => {
                let mapped = a.mapped.read();
                indices.extend(
                    (0..mapped.len() as u32).filter(|&i| mapped[i as usize]),
                );
            }
            _ => {}
        }
        if let Some(elements) = self.elements.read().as_ref() {
            for index in elements.present_indices() {
                if enumerable_only
                    && !elements
                        .attribute(index)
                        .unwrap_or_default()
                        .is_enumerable()
                {
                    continue;
                }
                indices.insert(index);
            }
        }
        keys.extend(indices.into_iter().map(PropertyName::Index));

        // `length` is never enumerable, so only the full listing sees it
        if !enumerable_only
            && matches!(self.kind, ObjectKind::Array(_) | ObjectKind::String(_))
        {
            keys.push(PropertyName::Ident(engine.well_known().length.clone()));
        }

        let class = self.class.read();
        for member in class.members() {
            let Some(name) = &member.name else { continue };
            if enumerable_only && !member.attrs.is_enumerable() {
                continue;
            }
            keys.push(PropertyName::Ident(name.clone()));
        }
        keys
    }

    /// For-in keys: own enumerable keys, then each prototype's, with
    /// shadowed names (enumerable or not) suppressed.
    pub fn enumerable_keys(&self, engine: &ExecutionEngine) -> Vec<PropertyName> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut seen_indices: BTreeSet<u32> = BTreeSet::new();
        let mut keys = Vec::new();

        let mut visit = |obj: &JsObject, keys: &mut Vec<PropertyName>| {
            for key in obj.own_property_keys(engine, false) {
                let enumerable = match &key {
                    PropertyName::Index(i) => {
                        if !seen_indices.insert(*i) {
                            continue;
                        }
                        obj.query_own_indexed(*i)
                            .is_some_and(|a| a.is_enumerable())
                    }
                    PropertyName::Ident(id) => {
                        if !seen.insert(id.as_str().to_string()) {
                            continue;
                        }
                        obj.query_own(engine, id).is_some_and(|a| a.is_enumerable())
                    }
                };
                if enumerable {
                    keys.push(key);
                }
            }
        };

        visit(self, &mut keys);
        let mut proto = self.prototype();
        while let Some(p) = proto {
            visit(&p, &mut keys);
            proto = p.prototype();
        }
        keys
    }

    // ---- integrity levels ----------------------------------------

    /// Object.seal
    pub fn seal(&self) {
        self.prevent_extensions();
        let class = self.class();
        self.apply_class(class.sealed());
        self.with_elements_mut(|e| {
            for index in e.present_indices() {
                let attrs = e.attribute(index).unwrap_or_default();
                e.set_attribute(index, attrs.sealed());
            }
        });
    }

    /// Object.freeze
    pub fn freeze(&self) {
        self.prevent_extensions();
        let class = self.class();
        self.apply_class(class.frozen());
        self.with_elements_mut(|e| {
            for index in e.present_indices() {
                let attrs = e.attribute(index).unwrap_or_default();
                e.set_attribute(index, attrs.frozen());
            }
        });
        if let ObjectKind::Array(meta) = &self.kind {
            meta.write().writable = false;
        }
    }

    /// Object.isSealed
    pub fn is_sealed(&self) -> bool {
        if self.header.is_extensible() {
            return false;
        }
        let class = self.class.read();
        if class.members().iter().any(|m| m.attrs.is_configurable()) {
            return false;
        }
        self.elements.read().as_ref().is_none_or(|e| {
            e.present_indices()
                .iter()
                .all(|&i| !e.attribute(i).unwrap_or_default().is_configurable())
        })
    }

    /// Object.isFrozen
    pub fn is_frozen(&self) -> bool {
        if !self.is_sealed() {
            return false;
        }
        let class = self.class.read();
        if class
            .members()
            .iter()
            .any(|m| m.attrs.is_data() && m.attrs.is_writable())
        {
            return false;
        }
        self.elements.read().as_ref().is_none_or(|e| {
            e.present_indices().iter().all(|&i| {
                let a = e.attribute(i).unwrap_or_default();
                a.is_accessor() || !a.is_writable()
            })
        })
    }
}

fn length_value(len: u32) -> Value {
    if len <= i32::MAX as u32 {
        Value::int32(len as i32)
    } else {
        Value::number(len as f64)
    }
}

/// Whether `new` extends `old` without disturbing existing slots, so
/// storage can grow in place instead of remapping.
fn same_prefix(old: &InternalClass, new: &InternalClass) -> bool {
    old.members()
        .iter()
        .zip(new.members())
        .all(|(a, b)| a.name == b.name && a.attrs == b.attrs)
}

impl GcObject for JsObject {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        self.class.read().trace(tracer);
        for v in self.slots.read().iter() {
            v.trace(tracer);
        }
        if let Some(elements) = self.elements.read().as_ref() {
            elements.trace(tracer);
        }
        for v in self.indexed_setters.read().values() {
            v.trace(tracer);
        }
        match &self.kind {
            ObjectKind::String(s) => tracer(s.header() as *const GcHeader),
            ObjectKind::Arguments(a) => a.context.trace(tracer),
            _ => {}
        }
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind.dispatch())
            .field("properties", &self.class.read().size())
            .finish()
    }
}
