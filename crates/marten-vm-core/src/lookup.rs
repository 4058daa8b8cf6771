//! Inline caches for named property access
//!
//! A [`Lookup`] remembers which class it last saw and which slot the
//! property occupied, so repeated access to same-shaped objects skips
//! the hash lookup entirely. The cache is always-correct, never
//! required: any miss falls back to the full protocol, and the state
//! only ever moves forward (monomorphic, polymorphic, generic).
//!
//! Only plain own data properties are cached. Accessors, synthesized
//! properties, and prototype hits stay on the slow path, which keeps
//! the fast path free of call and chain-walk logic.

use crate::engine::ExecutionEngine;
use crate::error::VmResult;
use crate::gc::GcRef;
use crate::identifier::Identifier;
use crate::internal_class::InternalClass;
use crate::object::JsObject;
use crate::value::Value;
use smallvec::SmallVec;
use std::sync::Arc;

const POLYMORPHIC_LIMIT: usize = 2;

#[derive(Clone)]
struct CacheEntry {
    class: Arc<InternalClass>,
    slot: usize,
}

enum LookupState {
    Uninitialized,
    Monomorphic(CacheEntry),
    Polymorphic(SmallVec<[CacheEntry; POLYMORPHIC_LIMIT]>),
    Generic,
}

/// A cached access site for one property name
pub struct Lookup {
    name: Identifier,
    state: LookupState,
}

impl Lookup {
    /// A fresh, uninitialized cache for `name`
    pub fn new(name: Identifier) -> Self {
        Self {
            name,
            state: LookupState::Uninitialized,
        }
    }

    /// The cached name
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    /// Whether the site has given up on caching
    pub fn is_generic(&self) -> bool {
        matches!(self.state, LookupState::Generic)
    }

    /// Whether the site has seen exactly one shape
    pub fn is_monomorphic(&self) -> bool {
        matches!(self.state, LookupState::Monomorphic(_))
    }

    fn cached_slot(&self, class: &Arc<InternalClass>) -> Option<usize> {
        match &self.state {
            LookupState::Monomorphic(entry) if Arc::ptr_eq(&entry.class, class) => {
                Some(entry.slot)
            }
            LookupState::Polymorphic(entries) => entries
                .iter()
                .find(|e| Arc::ptr_eq(&e.class, class))
                .map(|e| e.slot),
            _ => None,
        }
    }

    /// Whether the property is a plain own data member of `class`,
    /// and at which slot.
    fn cacheable_slot(&self, class: &Arc<InternalClass>) -> Option<usize> {
        let slot = class.find(&self.name)?;
        let attrs = class.attributes_at(slot);
        if attrs.is_accessor() {
            return None;
        }
        Some(slot)
    }

    fn record(&mut self, class: Arc<InternalClass>, slot: usize) {
        let entry = CacheEntry { class, slot };
        self.state = match std::mem::replace(&mut self.state, LookupState::Generic) {
            LookupState::Uninitialized => LookupState::Monomorphic(entry),
            LookupState::Monomorphic(existing) => {
                if Arc::ptr_eq(&existing.class, &entry.class) {
                    LookupState::Monomorphic(entry)
                } else {
                    let mut entries = SmallVec::new();
                    entries.push(existing);
                    entries.push(entry);
                    LookupState::Polymorphic(entries)
                }
            }
            LookupState::Polymorphic(mut entries) => {
                if let Some(existing) =
                    entries.iter_mut().find(|e| Arc::ptr_eq(&e.class, &entry.class))
                {
                    existing.slot = entry.slot;
                    LookupState::Polymorphic(entries)
                } else if entries.len() < POLYMORPHIC_LIMIT {
                    entries.push(entry);
                    LookupState::Polymorphic(entries)
                } else {
                    LookupState::Generic
                }
            }
            LookupState::Generic => LookupState::Generic,
        };
    }

    /// Cached [[Get]]. Identical in result to `obj.get`, faster when
    /// the shape repeats.
    pub fn get(
        &mut self,
        engine: &ExecutionEngine,
        obj: &GcRef<JsObject>,
        receiver: &Value,
    ) -> VmResult<Value> {
        let class = obj.class();
        if let Some(slot) = self.cached_slot(&class) {
            return Ok(obj.raw_slot(slot));
        }

        let result = obj.get(engine, &self.name, receiver)?;
        if !self.is_generic() {
            if let Some(slot) = self.cacheable_slot(&class) {
                self.record(class, slot);
            }
        }
        Ok(result)
    }

    /// Cached [[Set]]. Only own writable data members hit the fast
    /// path; everything else takes the protocol, including its
    /// rejection semantics.
    pub fn put(
        &mut self,
        engine: &ExecutionEngine,
        obj: &GcRef<JsObject>,
        value: Value,
        receiver: &Value,
    ) -> VmResult<bool> {
        let class = obj.class();
        if let Some(slot) = self.cached_slot(&class) {
            if class.attributes_at(slot).is_writable() {
                obj.set_raw_slot(slot, value);
                return Ok(true);
            }
        }

        let result = obj.put(engine, &self.name, value, receiver)?;
        if result && !self.is_generic() {
            // Re-read the class: the put may have added the member
            let class = obj.class();
            if let Some(slot) = self.cacheable_slot(&class) {
                if class.attributes_at(slot).is_writable() {
                    self.record(class, slot);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monomorphic_promotion_and_hit() {
        let engine = ExecutionEngine::new();
        let x = engine.identifiers().identifier("x");

        let a = engine.new_object();
        let ra = Value::object(a.clone());
        a.put(&engine, &x, Value::int32(1), &ra).unwrap();

        let mut lookup = Lookup::new(x.clone());
        assert_eq!(lookup.get(&engine, &a, &ra).unwrap(), Value::int32(1));
        assert!(lookup.is_monomorphic());

        // Same shape, different object: cache hit must read the right
        // object's storage.
        let b = engine.new_object();
        let rb = Value::object(b.clone());
        b.put(&engine, &x, Value::int32(2), &rb).unwrap();
        assert_eq!(lookup.get(&engine, &b, &rb).unwrap(), Value::int32(2));
        assert!(lookup.is_monomorphic());
    }

    #[test]
    fn test_polymorphic_then_generic() {
        let engine = ExecutionEngine::new();
        let ids = engine.identifiers();
        let x = ids.identifier("x");
        let mut lookup = Lookup::new(x.clone());

        // Three distinct shapes all carrying `x`
        let mut objects = Vec::new();
        for (i, extra) in ["a", "b", "c"].iter().enumerate() {
            let obj = engine.new_object();
            let r = Value::object(obj.clone());
            if i > 0 {
                obj.put(&engine, &ids.identifier(extra), Value::int32(0), &r)
                    .unwrap();
            }
            obj.put(&engine, &x, Value::int32(i as i32), &r).unwrap();
            objects.push((obj, r));
        }

        for (i, (obj, r)) in objects.iter().enumerate() {
            assert_eq!(
                lookup.get(&engine, obj, r).unwrap(),
                Value::int32(i as i32)
            );
        }
        assert!(lookup.is_generic());

        // Generic still answers correctly
        assert_eq!(
            lookup.get(&engine, &objects[0].0, &objects[0].1).unwrap(),
            Value::int32(0)
        );
    }

    #[test]
    fn test_cache_invalidated_by_shape_change() {
        let engine = ExecutionEngine::new();
        let ids = engine.identifiers();
        let x = ids.identifier("x");
        let y = ids.identifier("y");

        let obj = engine.new_object();
        let r = Value::object(obj.clone());
        obj.put(&engine, &x, Value::int32(1), &r).unwrap();

        let mut lookup = Lookup::new(x.clone());
        assert_eq!(lookup.get(&engine, &obj, &r).unwrap(), Value::int32(1));

        // Adding a member changes the class; the stale entry misses
        // and the slow path still returns the right answer.
        obj.put(&engine, &y, Value::int32(2), &r).unwrap();
        assert_eq!(lookup.get(&engine, &obj, &r).unwrap(), Value::int32(1));
    }

    #[test]
    fn test_put_fast_path_writes_through() {
        let engine = ExecutionEngine::new();
        let x = engine.identifiers().identifier("x");

        let obj = engine.new_object();
        let r = Value::object(obj.clone());
        obj.put(&engine, &x, Value::int32(1), &r).unwrap();

        let mut lookup = Lookup::new(x.clone());
        assert!(lookup.put(&engine, &obj, Value::int32(2), &r).unwrap());
        assert!(lookup.put(&engine, &obj, Value::int32(3), &r).unwrap());
        assert_eq!(
            obj.get(&engine, &x, &r).unwrap(),
            Value::int32(3)
        );
    }

    #[test]
    fn test_accessor_not_cached() {
        let engine = ExecutionEngine::new();
        let x = engine.identifiers().identifier("x");

        let obj = engine.new_object();
        let r = Value::object(obj.clone());
        let getter = Value::object(engine.new_native_function("get_x", 0, |_, _| {
            Ok(Value::int32(7))
        }));
        obj.insert_accessor(
            &x,
            getter,
            Value::undefined(),
            crate::property::PropertyAttributes::default_accessor(),
        );

        let mut lookup = Lookup::new(x.clone());
        assert_eq!(lookup.get(&engine, &obj, &r).unwrap(), Value::int32(7));
        assert!(!lookup.is_monomorphic());
        assert_eq!(lookup.get(&engine, &obj, &r).unwrap(), Value::int32(7));
    }
}
