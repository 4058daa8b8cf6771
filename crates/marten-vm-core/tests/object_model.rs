//! End-to-end object model behavior: shape sharing, the property
//! protocol, descriptors, arrays, and the arguments object.

use marten_vm_core::context::CallContext;
use marten_vm_core::engine::ExecutionEngine;
use marten_vm_core::identifier::PropertyName;
use marten_vm_core::property::{PropertyAttributes, PropertyDescriptor};
use marten_vm_core::value::Value;
use std::sync::Arc;

#[test]
fn test_objects_built_alike_share_a_class() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let x = ids.identifier("x");
    let y = ids.identifier("y");

    let o1 = engine.new_object();
    let r1 = Value::object(o1.clone());
    o1.put(&engine, &x, Value::int32(1), &r1).unwrap();
    o1.put(&engine, &y, Value::int32(2), &r1).unwrap();

    let o2 = engine.new_object();
    let r2 = Value::object(o2.clone());
    o2.put(&engine, &x, Value::int32(10), &r2).unwrap();
    o2.put(&engine, &y, Value::int32(20), &r2).unwrap();

    assert!(Arc::ptr_eq(&o1.class(), &o2.class()));

    // Different insertion order lands on a different class
    let o3 = engine.new_object();
    let r3 = Value::object(o3.clone());
    o3.put(&engine, &y, Value::int32(2), &r3).unwrap();
    o3.put(&engine, &x, Value::int32(1), &r3).unwrap();
    assert!(!Arc::ptr_eq(&o1.class(), &o3.class()));

    // Deleting from one diverges it without touching the other
    assert!(o2.delete_property(&engine, &x));
    assert!(!Arc::ptr_eq(&o1.class(), &o2.class()));
    assert_eq!(o1.get(&engine, &x, &r1).unwrap(), Value::int32(1));
    assert!(o2.get(&engine, &x, &r2).unwrap().is_undefined());
    assert_eq!(o2.get(&engine, &y, &r2).unwrap(), Value::int32(20));
}

#[test]
fn test_get_put_through_prototype_chain() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let shared = ids.identifier("shared");
    let own = ids.identifier("own");

    let proto = engine.new_object();
    let proto_r = Value::object(proto.clone());
    proto.put(&engine, &shared, Value::int32(1), &proto_r).unwrap();

    let obj = engine.new_object_with_prototype(Some(proto.clone()));
    let r = Value::object(obj.clone());
    assert_eq!(obj.get(&engine, &shared, &r).unwrap(), Value::int32(1));

    // Writing creates an own property, shadowing the prototype
    obj.put(&engine, &shared, Value::int32(2), &r).unwrap();
    assert_eq!(obj.get(&engine, &shared, &r).unwrap(), Value::int32(2));
    assert_eq!(proto.get(&engine, &shared, &proto_r).unwrap(), Value::int32(1));

    // A read-only prototype property rejects the write instead
    proto.insert_member(
        &own,
        Value::int32(9),
        PropertyAttributes::ENUMERABLE | PropertyAttributes::CONFIGURABLE,
    );
    assert!(!obj.put(&engine, &own, Value::int32(5), &r).unwrap());
    assert!(obj.query_own(&engine, &own).is_none());
}

#[test]
fn test_accessor_properties() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let x = ids.identifier("x");
    let backing = ids.identifier("backing");

    let obj = engine.new_object();
    let r = Value::object(obj.clone());
    obj.put(&engine, &backing, Value::int32(0), &r).unwrap();

    let getter = {
        let backing = backing.clone();
        engine.new_native_function("get_x", 0, move |engine, call| {
            let this = call.this_value().clone();
            let this_obj = this.as_object().unwrap();
            this_obj.get(engine, &backing, &this)
        })
    };
    let setter = {
        let backing = backing.clone();
        engine.new_native_function("set_x", 1, move |engine, call| {
            let this = call.this_value().clone();
            let this_obj = this.as_object().unwrap();
            this_obj.put(engine, &backing, call.argument(0), &this)?;
            Ok(Value::undefined())
        })
    };

    let desc = PropertyDescriptor {
        get: Some(Value::object(getter)),
        set: Some(Value::object(setter)),
        enumerable: Some(true),
        configurable: Some(true),
        ..Default::default()
    };
    assert!(obj.define_own_property(&engine, &x, &desc).unwrap());

    obj.put(&engine, &x, Value::int32(42), &r).unwrap();
    assert_eq!(obj.get(&engine, &x, &r).unwrap(), Value::int32(42));
    assert_eq!(obj.get(&engine, &backing, &r).unwrap(), Value::int32(42));

    // The descriptor round-trips with the same functions
    let read_back = obj.own_property_descriptor(&engine, &x).unwrap();
    assert!(read_back.get.unwrap().same_value(desc.get.as_ref().unwrap()));
    assert!(read_back.set.unwrap().same_value(desc.set.as_ref().unwrap()));
}

#[test]
fn test_non_configurable_redefinition_fails_without_side_effects() {
    let engine = ExecutionEngine::new();
    let x = engine.identifiers().identifier("x");

    let obj = engine.new_object();
    let mut desc = PropertyDescriptor::data(Value::int32(1));
    desc.configurable = Some(false);
    desc.writable = Some(false);
    assert!(obj.define_own_property(&engine, &x, &desc).unwrap());
    let class_before = obj.class();

    // Value change, kind flip, and re-configuration all fail
    let new_value = PropertyDescriptor {
        value: Some(Value::int32(2)),
        ..Default::default()
    };
    assert!(!obj.define_own_property(&engine, &x, &new_value).unwrap());

    let flip = PropertyDescriptor::accessor(Value::undefined(), Value::undefined());
    assert!(!obj.define_own_property(&engine, &x, &flip).unwrap());

    let raise = PropertyDescriptor {
        configurable: Some(true),
        ..Default::default()
    };
    assert!(!obj.define_own_property(&engine, &x, &raise).unwrap());

    // No partial application: class and value are untouched
    assert!(Arc::ptr_eq(&class_before, &obj.class()));
    let current = obj.own_property_descriptor(&engine, &x).unwrap();
    assert!(current.value.unwrap().same_value(&Value::int32(1)));

    // Reasserting the same state is still allowed
    assert!(obj.define_own_property(&engine, &x, &desc).unwrap());
}

#[test]
fn test_enumeration_order() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let z = ids.identifier("z");
    let a = ids.identifier("a");

    let obj = engine.new_object();
    let r = Value::object(obj.clone());
    obj.put_indexed(&engine, 5, Value::int32(1), &r).unwrap();
    obj.put_indexed(&engine, 0, Value::int32(2), &r).unwrap();
    obj.put(&engine, &z, Value::int32(3), &r).unwrap();
    obj.put(&engine, &a, Value::int32(4), &r).unwrap();

    let keys: Vec<String> = obj
        .own_property_keys(&engine, true)
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(keys, vec!["0", "5", "z", "a"]);
}

#[test]
fn test_for_in_shadowing_across_prototypes() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let shared = ids.identifier("shared");
    let inherited = ids.identifier("inherited");
    let hidden = ids.identifier("hidden");

    let proto = engine.new_object();
    let pr = Value::object(proto.clone());
    proto.put(&engine, &shared, Value::int32(1), &pr).unwrap();
    proto.put(&engine, &inherited, Value::int32(2), &pr).unwrap();
    proto.put(&engine, &hidden, Value::int32(3), &pr).unwrap();

    let obj = engine.new_object_with_prototype(Some(proto));
    let r = Value::object(obj.clone());
    obj.put(&engine, &shared, Value::int32(10), &r).unwrap();
    // A non-enumerable own property still shadows its prototype
    obj.insert_member(&hidden, Value::int32(30), PropertyAttributes::WRITABLE);

    let keys: Vec<String> = obj
        .enumerable_keys(&engine)
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(keys, vec!["shared", "inherited"]);
}

#[test]
fn test_array_length_tracks_highest_index() {
    let engine = ExecutionEngine::new();
    let arr = engine.new_array_object();
    let r = Value::object(arr.clone());

    arr.put_indexed(&engine, 0, Value::int32(1), &r).unwrap();
    arr.put_indexed(&engine, 9, Value::int32(2), &r).unwrap();
    assert_eq!(arr.array_length(), 10);

    let length = arr
        .get(&engine, &engine.well_known().length, &r)
        .unwrap();
    assert_eq!(length, Value::int32(10));

    // Shrinking the length drops elements
    assert!(arr
        .put(&engine, &engine.well_known().length, Value::int32(5), &r)
        .unwrap());
    assert_eq!(arr.array_length(), 5);
    assert!(arr.get_indexed(&engine, 9, &r).unwrap().is_undefined());
    assert_eq!(arr.get_indexed(&engine, 0, &r).unwrap(), Value::int32(1));
}

#[test]
fn test_array_truncation_stops_at_non_configurable_element() {
    let engine = ExecutionEngine::new();
    let arr = engine.new_array_object();
    let r = Value::object(arr.clone());
    for i in 0..10 {
        arr.put_indexed(&engine, i, Value::int32(i as i32), &r).unwrap();
    }
    let mut pinned = PropertyDescriptor::data(Value::int32(4));
    pinned.configurable = Some(false);
    assert!(arr.define_own_property_indexed(4, &pinned).unwrap());

    // Truncation to 0 stops at the pinned element
    assert!(!arr.set_array_length(0));
    assert_eq!(arr.array_length(), 5);
    assert_eq!(arr.get_indexed(&engine, 4, &r).unwrap(), Value::int32(4));
    assert!(arr.get_indexed(&engine, 5, &r).unwrap().is_undefined());
}

#[test]
fn test_sparse_array_behaves_like_dense() {
    let engine = ExecutionEngine::new();
    let arr = engine.new_array_object();
    let r = Value::object(arr.clone());

    arr.put_indexed(&engine, 1, Value::int32(1), &r).unwrap();
    arr.put_indexed(&engine, 2_000_000, Value::int32(2), &r).unwrap();

    assert_eq!(arr.get_indexed(&engine, 1, &r).unwrap(), Value::int32(1));
    assert_eq!(
        arr.get_indexed(&engine, 2_000_000, &r).unwrap(),
        Value::int32(2)
    );
    assert!(arr.get_indexed(&engine, 1_000, &r).unwrap().is_undefined());
    assert_eq!(arr.array_length(), 2_000_001);

    assert!(arr.delete_indexed(2_000_000));
    assert!(arr
        .get_indexed(&engine, 2_000_000, &r)
        .unwrap()
        .is_undefined());

    let keys = arr.own_property_keys(&engine, true);
    assert_eq!(keys, vec![PropertyName::Index(1)]);

    // The full listing adds the non-enumerable length
    let all: Vec<String> = arr
        .own_property_keys(&engine, false)
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(all, vec!["1", "length"]);
}

#[test]
fn test_seal_and_freeze() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let x = ids.identifier("x");
    let y = ids.identifier("y");

    let obj = engine.new_object();
    let r = Value::object(obj.clone());
    obj.put(&engine, &x, Value::int32(1), &r).unwrap();
    obj.put_indexed(&engine, 0, Value::int32(2), &r).unwrap();

    obj.seal();
    assert!(obj.is_sealed());
    assert!(!obj.is_frozen());
    assert!(!obj.delete_property(&engine, &x));
    assert!(!obj.delete_indexed(0));
    // Sealed still writable
    assert!(obj.put(&engine, &x, Value::int32(5), &r).unwrap());
    // New properties rejected
    assert!(!obj.put(&engine, &y, Value::int32(3), &r).unwrap());

    obj.freeze();
    assert!(obj.is_frozen());
    assert!(!obj.put(&engine, &x, Value::int32(9), &r).unwrap());
    assert!(!obj.put_indexed(&engine, 0, Value::int32(9), &r).unwrap());
    assert_eq!(obj.get(&engine, &x, &r).unwrap(), Value::int32(5));
}

#[test]
fn test_string_wrapper_synthesized_properties() {
    let engine = ExecutionEngine::new();
    let s = engine.intern("héllo");
    let obj = engine.new_string_object(Arc::clone(&s));
    let r = Value::object(obj.clone());

    let length = obj
        .get(&engine, &engine.well_known().length, &r)
        .unwrap();
    assert_eq!(length, Value::int32(5));

    let first = obj.get_indexed(&engine, 0, &r).unwrap();
    assert_eq!(first.as_string().unwrap().as_str(), "h");

    // Indexed characters are read-only and undeletable
    assert!(!obj.put_indexed(&engine, 0, Value::int32(1), &r).unwrap());
    assert!(!obj.delete_indexed(0));
    assert!(!obj
        .put(&engine, &engine.well_known().length, Value::int32(0), &r)
        .unwrap());

    // Past the end the wrapper is a normal object
    assert!(obj.get_indexed(&engine, 10, &r).unwrap().is_undefined());
    assert!(obj.put_indexed(&engine, 10, Value::int32(1), &r).unwrap());
    assert_eq!(obj.get_indexed(&engine, 10, &r).unwrap(), Value::int32(1));

    // Character indices first, then the synthesized length
    let all: Vec<String> = obj
        .own_property_keys(&engine, false)
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(all, vec!["0", "1", "2", "3", "4", "10", "length"]);
}

fn make_arguments(
    engine: &ExecutionEngine,
    args: Vec<Value>,
    formals: &[&str],
    strict: bool,
) -> (Arc<CallContext>, marten_vm_core::GcRef<marten_vm_core::JsObject>) {
    let func = Value::object(engine.new_native_function("f", formals.len() as u32, |_, _| {
        Ok(Value::undefined())
    }));
    let formal_names = formals
        .iter()
        .map(|n| engine.identifiers().identifier(n))
        .collect();
    let ctx = Arc::new(CallContext::new(
        func,
        Value::undefined(),
        args,
        formal_names,
        strict,
    ));
    let obj = engine.new_arguments_object(&ctx).unwrap();
    (ctx, obj)
}

#[test]
fn test_arguments_alias_parameters() {
    let engine = ExecutionEngine::new();
    let (ctx, obj) = make_arguments(
        &engine,
        vec![Value::int32(1), Value::int32(2)],
        &["a", "b"],
        false,
    );
    let r = Value::object(obj.clone());

    // Reads see the locals
    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(1));
    ctx.set_local(0, Value::int32(100));
    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(100));

    // Writes flow back
    obj.put_indexed(&engine, 1, Value::int32(200), &r).unwrap();
    assert_eq!(ctx.local(1), Value::int32(200));

    // length and callee are plain properties
    let length = obj
        .get(&engine, &engine.well_known().length, &r)
        .unwrap();
    assert_eq!(length, Value::int32(2));
    let callee = obj
        .get(&engine, &engine.well_known().callee, &r)
        .unwrap();
    assert!(callee.same_value(ctx.function()));
}

#[test]
fn test_arguments_delete_severs_aliasing() {
    let engine = ExecutionEngine::new();
    let (ctx, obj) = make_arguments(&engine, vec![Value::int32(1)], &["a"], false);
    let r = Value::object(obj.clone());

    assert!(obj.delete_indexed(0));
    assert!(obj.get_indexed(&engine, 0, &r).unwrap().is_undefined());

    // The local survives, but the link is gone both ways
    assert_eq!(ctx.local(0), Value::int32(1));
    obj.put_indexed(&engine, 0, Value::int32(7), &r).unwrap();
    assert_eq!(ctx.local(0), Value::int32(1));
    ctx.set_local(0, Value::int32(9));
    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(7));
}

#[test]
fn test_arguments_redefinition_severs_aliasing() {
    let engine = ExecutionEngine::new();
    let (ctx, obj) = make_arguments(&engine, vec![Value::int32(1)], &["a"], false);
    let r = Value::object(obj.clone());

    let mut desc = PropertyDescriptor::data(Value::int32(5));
    desc.writable = Some(false);
    assert!(obj.define_own_property_indexed(0, &desc).unwrap());

    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(5));
    ctx.set_local(0, Value::int32(9));
    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(5));
}

#[test]
fn test_strict_arguments_not_mapped() {
    let engine = ExecutionEngine::new();
    let (ctx, obj) = make_arguments(&engine, vec![Value::int32(1)], &["a"], true);
    let r = Value::object(obj.clone());

    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(1));
    ctx.set_local(0, Value::int32(2));
    assert_eq!(obj.get_indexed(&engine, 0, &r).unwrap(), Value::int32(1));

    // Poisoned callee throws
    assert!(obj
        .get(&engine, &engine.well_known().callee, &r)
        .is_err());
}
