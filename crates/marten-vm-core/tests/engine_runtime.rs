//! Engine-level behavior: scope resolution, calls, exceptions, the
//! debugger rendezvous, and garbage collection.

use marten_vm_core::context::{CallContext, ExecutionContext};
use marten_vm_core::debugger::{DebuggerRendezvous, Job};
use marten_vm_core::engine::ExecutionEngine;
use marten_vm_core::error::VmError;
use marten_vm_core::runtime;
use marten_vm_core::value::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[test]
fn test_global_name_resolution() {
    let engine = ExecutionEngine::new();
    let x = engine.identifiers().identifier("x");
    let ctx = engine.current_context();

    // Unresolvable reads throw
    let err = ctx.get_property(&engine, &x).unwrap_err();
    assert!(matches!(err, VmError::ReferenceError(_)));

    // Sloppy assignment creates an implicit global
    ctx.set_property(&engine, &x, Value::int32(1)).unwrap();
    assert_eq!(ctx.get_property(&engine, &x).unwrap(), Value::int32(1));

    let global = engine.global_object();
    let gr = Value::object(global.clone());
    assert_eq!(global.get(&engine, &x, &gr).unwrap(), Value::int32(1));
}

#[test]
fn test_strict_assignment_to_unresolved_name_throws() {
    let engine = ExecutionEngine::new();
    let x = engine.identifiers().identifier("x");

    let call = Arc::new(CallContext::new(
        Value::undefined(),
        Value::undefined(),
        Vec::new(),
        Vec::new(),
        true,
    ));
    let ctx = ExecutionContext::call(engine.global_context(), call);

    let err = ctx
        .set_property(&engine, &x, Value::int32(1))
        .unwrap_err();
    assert!(matches!(err, VmError::ReferenceError(_)));
    assert!(ctx.get_property(&engine, &x).is_err());
}

#[test]
fn test_with_and_catch_scopes() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let x = ids.identifier("x");
    let e = ids.identifier("e");

    let scope_obj = engine.new_object();
    let sr = Value::object(scope_obj.clone());
    scope_obj.put(&engine, &x, Value::int32(1), &sr).unwrap();

    engine.push_with_scope(scope_obj.clone());
    let ctx = engine.current_context();
    assert_eq!(ctx.get_property(&engine, &x).unwrap(), Value::int32(1));

    // Assignment inside `with` goes to the scope object
    ctx.set_property(&engine, &x, Value::int32(2)).unwrap();
    assert_eq!(scope_obj.get(&engine, &x, &sr).unwrap(), Value::int32(2));

    engine.push_catch_scope(e.clone(), Value::int32(99));
    let ctx = engine.current_context();
    assert_eq!(ctx.get_property(&engine, &e).unwrap(), Value::int32(99));
    // Catch bindings are assignable but not deletable
    ctx.set_property(&engine, &e, Value::int32(100)).unwrap();
    assert_eq!(ctx.get_property(&engine, &e).unwrap(), Value::int32(100));
    assert!(!ctx.delete_property(&engine, &e));

    assert!(engine.pop_scope());
    assert!(engine.pop_scope());
    // Back at global: the catch binding is gone
    assert!(engine
        .current_context()
        .get_property(&engine, &e)
        .is_err());
}

#[test]
fn test_call_parameters_resolve_in_scope() {
    let engine = ExecutionEngine::new();
    let a = engine.identifiers().identifier("a");

    let func = Value::object(engine.new_native_function("f", 1, |engine, call| {
        let a = engine.identifiers().identifier("a");
        engine.current_context().get_property(engine, &a)?;
        engine
            .current_context()
            .set_property(engine, &a, Value::int32(5))?;
        Ok(call.context.local(0))
    }));

    let result = engine
        .call_with_formals(
            &func,
            Value::undefined(),
            vec![Value::int32(1)],
            vec![a],
            false,
        )
        .unwrap();
    assert_eq!(result, Value::int32(5));
}

#[test]
fn test_stack_overflow_is_a_range_error() {
    let engine = ExecutionEngine::new();
    let func = Value::object(engine.new_native_function("recurse", 0, |engine, call| {
        engine.call_function(call.context.function(), Value::undefined(), Vec::new())
    }));

    let err = engine
        .call_function(&func, Value::undefined(), Vec::new())
        .unwrap_err();
    assert!(matches!(err, VmError::StackOverflow));
    assert_eq!(
        err.to_string(),
        "RangeError: Maximum call stack size exceeded"
    );
    // The failure left a pending exception with a captured stack
    assert!(engine.has_pending_exception());
    assert!(!engine.pending_stack().unwrap().is_empty());
    engine.catch_exception();

    // The engine is usable again afterwards
    let ok = Value::object(engine.new_native_function("ok", 0, |_, _| Ok(Value::int32(1))));
    assert_eq!(
        engine.call_function(&ok, Value::undefined(), Vec::new()).unwrap(),
        Value::int32(1)
    );
}

#[test]
fn test_pending_exception_lifecycle() {
    let engine = ExecutionEngine::new();
    assert!(!engine.has_pending_exception());

    let err = engine.throw_type_error("not an object");
    assert!(matches!(err, VmError::TypeError(_)));
    assert!(engine.has_pending_exception());

    let value = engine.catch_exception().unwrap();
    assert_eq!(
        value.as_string().unwrap().as_str(),
        "TypeError: not an object"
    );
    assert!(!engine.has_pending_exception());
}

#[test]
fn test_thrown_value_carries_stack() {
    let engine = ExecutionEngine::new();
    let func = Value::object(engine.new_native_function("boomer", 0, |engine, _| {
        Err(engine.throw(Value::int32(13)))
    }));

    let err = engine
        .call_function(&func, Value::undefined(), Vec::new())
        .unwrap_err();
    let VmError::Exception(thrown) = err else {
        panic!("expected a thrown value");
    };
    assert!(thrown.value.same_value(&Value::int32(13)));
    assert_eq!(thrown.stack[0].function, "boomer");
    assert!(engine.catch_exception().unwrap().same_value(&Value::int32(13)));
}

#[test]
fn test_construct_uses_callee_prototype() {
    let engine = ExecutionEngine::new();
    let ids = engine.identifiers();
    let x = ids.identifier("x");

    let ctor = Value::object(engine.new_native_function("Point", 1, |engine, call| {
        let this = call.this_value().clone();
        let obj = this.as_object().unwrap();
        let x = engine.identifiers().identifier("x");
        obj.put(engine, &x, call.argument(0), &this)?;
        Ok(Value::undefined())
    }));

    let p1 = runtime::construct_value(&engine, &ctor, vec![Value::int32(1)]).unwrap();
    let p2 = runtime::construct_value(&engine, &ctor, vec![Value::int32(2)]).unwrap();
    let o1 = p1.as_object().unwrap();
    let o2 = p2.as_object().unwrap();

    assert_eq!(o1.get(&engine, &x, &p1).unwrap(), Value::int32(1));
    assert_eq!(o2.get(&engine, &x, &p2).unwrap(), Value::int32(2));

    // Instances share prototype and class
    assert!(Arc::ptr_eq(&o1.class(), &o2.class()));
    let ctor_back = o1
        .get(&engine, &engine.well_known().constructor, &p1)
        .unwrap();
    assert!(ctor_back.same_value(&ctor));

    // A constructor returning an object overrides the allocation
    let swap = Value::object(engine.new_native_function("Swap", 0, |engine, _| {
        Ok(Value::object(engine.new_array_object()))
    }));
    let swapped = runtime::construct_value(&engine, &swap, Vec::new()).unwrap();
    assert_eq!(swapped.as_object().unwrap().array_length(), 0);
}

#[test]
fn test_value_level_property_access() {
    let engine = ExecutionEngine::new();
    let key = engine.identifiers().property_name("x");

    let err = runtime::get_property(&engine, &Value::undefined(), &key).unwrap_err();
    assert!(matches!(err, VmError::TypeError(_)));
    engine.catch_exception();

    // Primitive strings answer length and indices without a wrapper
    let s = Value::string(engine.intern("abc"));
    let len_key = engine.identifiers().property_name("length");
    assert_eq!(
        runtime::get_property(&engine, &s, &len_key).unwrap(),
        Value::int32(3)
    );
    let idx = engine.identifiers().property_name("1");
    let c = runtime::get_property(&engine, &s, &idx).unwrap();
    assert_eq!(c.as_string().unwrap().as_str(), "b");

    // Writes to primitives evaporate quietly
    assert!(!runtime::put_property(&engine, &s, &key, Value::int32(1)).unwrap());
}

#[test]
fn test_conversions() {
    let engine = ExecutionEngine::new();

    assert!(runtime::to_number(&engine, &Value::undefined()).unwrap().is_nan());
    assert_eq!(runtime::to_number(&engine, &Value::null()).unwrap(), 0.0);
    assert_eq!(
        runtime::to_number(&engine, &Value::string(engine.intern(" 12 "))).unwrap(),
        12.0
    );

    let s = runtime::to_string(&engine, &Value::number(1.5)).unwrap();
    assert_eq!(s.as_str(), "1.5");
    let s = runtime::to_string(&engine, &Value::boolean(true)).unwrap();
    assert_eq!(s.as_str(), "true");

    // An object converts through its valueOf
    let obj = engine.new_object();
    let r = Value::object(obj.clone());
    let value_of = Value::object(engine.new_native_function("valueOf", 0, |_, _| {
        Ok(Value::int32(7))
    }));
    obj.put(&engine, &engine.well_known().value_of, value_of, &r).unwrap();
    assert_eq!(runtime::to_number(&engine, &r).unwrap(), 7.0);

    // Property keys canonicalize indices
    let key = runtime::to_property_key(&engine, &Value::int32(3)).unwrap();
    assert_eq!(key.as_index(), Some(3));
    let key = runtime::to_property_key(&engine, &Value::number(-1.0)).unwrap();
    assert!(key.as_index().is_none());
}

struct FlagJob {
    flag: Arc<AtomicBool>,
    observed_globals: Arc<AtomicBool>,
}

impl Job for FlagJob {
    fn run(&mut self, engine: &ExecutionEngine) {
        // Runs on the engine thread: engine state is safe to touch
        let x = engine.identifiers().identifier("probe");
        let global = engine.global_object();
        let gr = Value::object(global.clone());
        if global.get(engine, &x, &gr).unwrap() == Value::int32(42) {
            self.observed_globals.store(true, Ordering::SeqCst);
        }
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_debugger_rendezvous_runs_job_on_engine_thread() {
    let engine = ExecutionEngine::new();
    let rendezvous = Arc::new(DebuggerRendezvous::new());
    engine.set_debugger(Arc::clone(&rendezvous));

    let x = engine.identifiers().identifier("probe");
    engine
        .current_context()
        .set_property(&engine, &x, Value::int32(42))
        .unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicBool::new(false));
    let submitter = {
        let rendezvous = Arc::clone(&rendezvous);
        let flag = Arc::clone(&flag);
        let observed = Arc::clone(&observed);
        std::thread::spawn(move || {
            rendezvous.submit(Box::new(FlagJob {
                flag,
                observed_globals: observed,
            }));
        })
    };

    // The engine reaches a safe point on every call
    let noop = Value::object(engine.new_native_function("noop", 0, |_, _| {
        Ok(Value::undefined())
    }));
    while !flag.load(Ordering::SeqCst) {
        engine.call_function(&noop, Value::undefined(), Vec::new()).unwrap();
        std::thread::yield_now();
    }
    submitter.join().unwrap();
    assert!(observed.load(Ordering::SeqCst));
    assert!(!rendezvous.has_pending_job());
}

struct ThrowObserver {
    flag: Arc<AtomicBool>,
    saw_exception: Arc<AtomicBool>,
}

impl Job for ThrowObserver {
    fn run(&mut self, engine: &ExecutionEngine) {
        if let Some(value) = engine.pending_exception_value() {
            if value
                .as_string()
                .is_some_and(|s| s.as_str() == "TypeError: boom")
            {
                self.saw_exception.store(true, Ordering::SeqCst);
            }
        }
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_debugger_job_observes_throw_in_flight() {
    let engine = ExecutionEngine::new();
    let rendezvous = Arc::new(DebuggerRendezvous::new());
    engine.set_debugger(Arc::clone(&rendezvous));

    let flag = Arc::new(AtomicBool::new(false));
    let saw = Arc::new(AtomicBool::new(false));
    let submitter = {
        let rendezvous = Arc::clone(&rendezvous);
        let flag = Arc::clone(&flag);
        let saw = Arc::clone(&saw);
        std::thread::spawn(move || {
            rendezvous.submit(Box::new(ThrowObserver {
                flag,
                saw_exception: saw,
            }));
        })
    };

    // Every throw is a safe point with the exception still observable
    while !flag.load(Ordering::SeqCst) {
        let err = engine.throw_type_error("boom");
        assert!(matches!(err, VmError::TypeError(_)));
        engine.catch_exception();
        std::thread::yield_now();
    }
    submitter.join().unwrap();
    assert!(saw.load(Ordering::SeqCst));
    assert!(engine.pending_exception_value().is_none());
}

#[test]
fn test_garbage_collection_reclaims_unreachable_objects() {
    let engine = ExecutionEngine::new();
    let keep = engine.identifiers().identifier("keep");

    engine.collect_garbage();
    let baseline = engine.heap().live_objects();

    // One object reachable from the global, one garbage
    let kept = engine.new_object();
    engine
        .current_context()
        .set_property(&engine, &keep, Value::object(kept.clone()))
        .unwrap();
    let _garbage = engine.new_object();

    engine.collect_garbage();
    assert_eq!(engine.heap().live_objects(), baseline + 1);

    // Removing the reference makes the survivor collectable too
    let global = engine.global_object();
    assert!(global.delete_property(&engine, &keep));
    engine.collect_garbage();
    assert_eq!(engine.heap().live_objects(), baseline);

    let stats = engine.gc_stats();
    assert_eq!(stats.collections, 3);
}
