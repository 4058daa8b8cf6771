//! The execution engine
//!
//! Owns everything one script universe needs: the identifier and
//! string tables, the managed heap and collector, the root classes
//! and builtin prototypes, the scope-chain state, and the pending
//! exception slot. Engine state is thread-confined; the debugger
//! rendezvous is the only supported cross-thread entry.

use crate::context::{CallContext, ExecutionContext, MAX_STACK_DEPTH};
use crate::debugger::DebuggerRendezvous;
use crate::error::{StackFrame, ThrownValue, VmError, VmResult};
use crate::gc::{Collector, GcHeap, GcRef, GcStats};
use crate::identifier::{Identifier, IdentifierTable, WellKnown};
use crate::internal_class::{DispatchKind, InternalClass};
use crate::object::{ArgumentsData, ArrayLength, FunctionData, JsObject, ObjectKind};
use crate::property::PropertyAttributes;
use crate::runtime::CallData;
use crate::string::JsString;
use crate::value::Value;
use marten_vm_gc::GcHeader;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An exception that has been thrown but not yet caught
pub struct PendingException {
    /// The thrown value
    pub value: Value,
    /// Call stack captured at the throw site
    pub stack: Vec<StackFrame>,
}

struct BaseClasses {
    object: Arc<InternalClass>,
    array: Arc<InternalClass>,
    string: Arc<InternalClass>,
    number: Arc<InternalClass>,
    boolean: Arc<InternalClass>,
    date: Arc<InternalClass>,
    function: Arc<InternalClass>,
    arguments: Arc<InternalClass>,
}

struct Prototypes {
    object: GcRef<JsObject>,
    array: GcRef<JsObject>,
    string: GcRef<JsObject>,
    number: GcRef<JsObject>,
    boolean: GcRef<JsObject>,
    date: GcRef<JsObject>,
    function: GcRef<JsObject>,
}

/// One script universe
pub struct ExecutionEngine {
    heap: Arc<GcHeap>,
    collector: Mutex<Collector>,
    identifiers: IdentifierTable,
    well_known: WellKnown,
    classes: BaseClasses,
    prototypes: Prototypes,
    global_object: GcRef<JsObject>,
    global_context: Arc<ExecutionContext>,
    current_context: RwLock<Arc<ExecutionContext>>,
    call_depth: AtomicUsize,
    pending_exception: RwLock<Option<PendingException>>,
    debugger: RwLock<Option<Arc<DebuggerRendezvous>>>,
}

impl ExecutionEngine {
    /// Create an engine with its builtin prototypes and global object
    pub fn new() -> Self {
        let heap = GcHeap::new();
        let collector = Mutex::new(Collector::new(Arc::clone(&heap)));
        let identifiers = IdentifierTable::new();
        let well_known = WellKnown::intern(&identifiers);

        // Object.prototype is the root of every default chain
        let root_class = InternalClass::empty(DispatchKind::Ordinary, None);
        let object_prototype = GcRef::new(JsObject::new(
            Arc::clone(&root_class),
            ObjectKind::Ordinary,
        ));
        adopt(&heap, &object_prototype);

        let ordinary_class = InternalClass::empty(
            DispatchKind::Ordinary,
            Some(object_prototype.clone()),
        );
        let new_proto = || {
            let obj = GcRef::new(JsObject::new(
                Arc::clone(&ordinary_class),
                ObjectKind::Ordinary,
            ));
            adopt(&heap, &obj);
            obj
        };
        let array_prototype = new_proto();
        let string_prototype = new_proto();
        let number_prototype = new_proto();
        let boolean_prototype = new_proto();
        let date_prototype = new_proto();

        // Function.prototype is itself callable and ignores its input
        let function_prototype = GcRef::new(JsObject::new(
            InternalClass::empty(DispatchKind::Function, Some(object_prototype.clone())),
            ObjectKind::Function(FunctionData {
                name: String::new(),
                formal_count: 0,
                func: Arc::new(|_, _| Ok(Value::undefined())),
            }),
        ));
        adopt(&heap, &function_prototype);

        let classes = BaseClasses {
            object: Arc::clone(&ordinary_class),
            array: InternalClass::empty(DispatchKind::Array, Some(array_prototype.clone())),
            string: InternalClass::empty(DispatchKind::String, Some(string_prototype.clone())),
            number: InternalClass::empty(DispatchKind::Number, Some(number_prototype.clone())),
            boolean: InternalClass::empty(
                DispatchKind::Boolean,
                Some(boolean_prototype.clone()),
            ),
            date: InternalClass::empty(DispatchKind::Date, Some(date_prototype.clone())),
            function: InternalClass::empty(
                DispatchKind::Function,
                Some(function_prototype.clone()),
            ),
            arguments: InternalClass::empty(
                DispatchKind::Arguments,
                Some(object_prototype.clone()),
            ),
        };

        let global_object = GcRef::new(JsObject::new(
            Arc::clone(&ordinary_class),
            ObjectKind::Ordinary,
        ));
        adopt(&heap, &global_object);
        let global_context = ExecutionContext::global(global_object.clone());

        Self {
            heap,
            collector,
            identifiers,
            well_known,
            classes,
            prototypes: Prototypes {
                object: object_prototype,
                array: array_prototype,
                string: string_prototype,
                number: number_prototype,
                boolean: boolean_prototype,
                date: date_prototype,
                function: function_prototype,
            },
            global_object,
            global_context: Arc::clone(&global_context),
            current_context: RwLock::new(global_context),
            call_depth: AtomicUsize::new(0),
            pending_exception: RwLock::new(None),
            debugger: RwLock::new(None),
        }
    }

    // ---- tables and singletons -----------------------------------

    /// The identifier table
    pub fn identifiers(&self) -> &IdentifierTable {
        &self.identifiers
    }

    /// The preinterned well-known identifiers
    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    /// Intern a string in this engine's table
    pub fn intern(&self, s: &str) -> Arc<JsString> {
        self.identifiers.strings().intern(s)
    }

    /// The managed heap
    pub fn heap(&self) -> &Arc<GcHeap> {
        &self.heap
    }

    /// The global object
    pub fn global_object(&self) -> GcRef<JsObject> {
        self.global_object.clone()
    }

    /// Object.prototype
    pub fn object_prototype(&self) -> GcRef<JsObject> {
        self.prototypes.object.clone()
    }

    /// Array.prototype
    pub fn array_prototype(&self) -> GcRef<JsObject> {
        self.prototypes.array.clone()
    }

    /// String.prototype
    pub fn string_prototype(&self) -> GcRef<JsObject> {
        self.prototypes.string.clone()
    }

    /// Function.prototype
    pub fn function_prototype(&self) -> GcRef<JsObject> {
        self.prototypes.function.clone()
    }

    // ---- object construction -------------------------------------

    /// A plain object with Object.prototype
    pub fn new_object(&self) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.object),
            ObjectKind::Ordinary,
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// A plain object with an explicit prototype. Instances of the
    /// same constructor share a class because the prototype transition
    /// is memoized.
    pub fn new_object_with_prototype(&self, proto: Option<GcRef<JsObject>>) -> GcRef<JsObject> {
        let class = self.classes.object.change_prototype(proto);
        let obj = GcRef::new(JsObject::new(class, ObjectKind::Ordinary));
        adopt(&self.heap, &obj);
        obj
    }

    /// An empty array
    pub fn new_array_object(&self) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.array),
            ObjectKind::Array(RwLock::new(ArrayLength {
                len: 0,
                writable: true,
            })),
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// An array populated from a slice
    pub fn new_array_from(&self, values: &[Value]) -> VmResult<GcRef<JsObject>> {
        let arr = self.new_array_object();
        let receiver = Value::object(arr.clone());
        for (i, v) in values.iter().enumerate() {
            arr.put_indexed(self, i as u32, v.clone(), &receiver)?;
        }
        Ok(arr)
    }

    /// A String wrapper object
    pub fn new_string_object(&self, value: Arc<JsString>) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.string),
            ObjectKind::String(value),
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// A Number wrapper object
    pub fn new_number_object(&self, value: f64) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.number),
            ObjectKind::Number(value),
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// A Boolean wrapper object
    pub fn new_boolean_object(&self, value: bool) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.boolean),
            ObjectKind::Boolean(value),
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// A Date object holding the given time value
    pub fn new_date_object(&self, time: f64) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.date),
            ObjectKind::Date(RwLock::new(time)),
        ));
        adopt(&self.heap, &obj);
        obj
    }

    /// A callable function object backed by a native implementation.
    /// It gets `name` and `length` properties and a fresh `prototype`
    /// object with a `constructor` back-reference.
    pub fn new_native_function(
        &self,
        name: &str,
        formal_count: u32,
        func: impl Fn(&ExecutionEngine, &CallData) -> VmResult<Value> + Send + Sync + 'static,
    ) -> GcRef<JsObject> {
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.function),
            ObjectKind::Function(FunctionData {
                name: name.to_string(),
                formal_count,
                func: Arc::new(func),
            }),
        ));
        adopt(&self.heap, &obj);

        obj.insert_member(
            &self.well_known.name,
            Value::string(self.intern(name)),
            PropertyAttributes::CONFIGURABLE,
        );
        obj.insert_member(
            &self.well_known.length,
            Value::int32(formal_count as i32),
            PropertyAttributes::CONFIGURABLE,
        );

        let prototype = self.new_object();
        prototype.insert_member(
            &self.well_known.constructor,
            Value::object(obj.clone()),
            PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
        );
        obj.insert_member(
            &self.well_known.prototype,
            Value::object(prototype),
            PropertyAttributes::WRITABLE,
        );
        obj
    }

    /// The arguments object of an activation. Sloppy-mode formals are
    /// aliased; strict mode gets a plain snapshot with a poisoned
    /// `callee`.
    pub fn new_arguments_object(&self, context: &Arc<CallContext>) -> VmResult<GcRef<JsObject>> {
        let mapped_count = if context.strict() {
            0
        } else {
            context.formal_count().min(context.arg_count())
        };
        let obj = GcRef::new(JsObject::new(
            Arc::clone(&self.classes.arguments),
            ObjectKind::Arguments(ArgumentsData::new(Arc::clone(context), mapped_count)),
        ));
        adopt(&self.heap, &obj);

        let receiver = Value::object(obj.clone());
        for (i, arg) in context.args().iter().enumerate() {
            obj.put_indexed(self, i as u32, arg.clone(), &receiver)?;
        }
        obj.insert_member(
            &self.well_known.length,
            Value::int32(context.arg_count() as i32),
            PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
        );
        if context.strict() {
            let thrower = Value::object(self.new_native_function("", 0, |engine, _| {
                Err(engine.throw_type_error(
                    "'callee' may not be accessed in strict mode",
                ))
            }));
            obj.insert_accessor(
                &self.well_known.callee,
                thrower.clone(),
                thrower,
                PropertyAttributes::ACCESSOR,
            );
        } else {
            obj.insert_member(
                &self.well_known.callee,
                context.function().clone(),
                PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE,
            );
        }
        Ok(obj)
    }

    // ---- calling -------------------------------------------------

    /// Invoke a callable value. Pushes a call scope for the duration
    /// and enforces the depth limit before entering.
    pub fn call_function(
        &self,
        func: &Value,
        this: Value,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        self.call_with_formals(func, this, args, Vec::new(), false)
    }

    /// Invoke a callable with declared parameter names and strictness,
    /// for callers that model script functions.
    pub fn call_with_formals(
        &self,
        func: &Value,
        this: Value,
        args: Vec<Value>,
        formal_names: Vec<Identifier>,
        strict: bool,
    ) -> VmResult<Value> {
        let native = match func.as_object().and_then(|o| o.function()) {
            Some(data) => Arc::clone(&data.func),
            None => {
                return Err(self.throw_type_error(format!("{:?} is not a function", func)));
            }
        };

        if self.call_depth.load(Ordering::Relaxed) >= MAX_STACK_DEPTH {
            let error = VmError::StackOverflow;
            *self.pending_exception.write() = Some(PendingException {
                value: Value::string(self.intern(&error.to_string())),
                stack: self.capture_stack(),
            });
            return Err(error);
        }

        let call_context = Arc::new(CallContext::new(
            func.clone(),
            this,
            args,
            formal_names,
            strict,
        ));
        let outer = self.current_context.read().clone();
        *self.current_context.write() =
            ExecutionContext::call(&outer, Arc::clone(&call_context));
        self.call_depth.fetch_add(1, Ordering::Relaxed);

        self.process_debugger_jobs();
        let result = native(self, &CallData {
            context: call_context,
        });

        self.call_depth.fetch_sub(1, Ordering::Relaxed);
        *self.current_context.write() = outer;
        result
    }

    /// `new func(args...)`: allocate with the callee's `prototype`,
    /// call, and keep the allocation unless the callee returned an
    /// object of its own.
    pub fn construct(&self, func: &Value, args: Vec<Value>) -> VmResult<Value> {
        let Some(func_obj) = func.as_object() else {
            return Err(self.throw_type_error(format!("{:?} is not a constructor", func)));
        };
        if !func_obj.is_callable() {
            return Err(self.throw_type_error(format!("{:?} is not a constructor", func)));
        }

        let proto_value = func_obj.get(self, &self.well_known.prototype, func)?;
        let proto = proto_value
            .as_object()
            .cloned()
            .unwrap_or_else(|| self.prototypes.object.clone());
        let this = self.new_object_with_prototype(Some(proto));

        let result = self.call_function(func, Value::object(this.clone()), args)?;
        if result.is_object() {
            Ok(result)
        } else {
            Ok(Value::object(this))
        }
    }

    // ---- scope chain ---------------------------------------------

    /// The innermost context
    pub fn current_context(&self) -> Arc<ExecutionContext> {
        self.current_context.read().clone()
    }

    /// The global context
    pub fn global_context(&self) -> &Arc<ExecutionContext> {
        &self.global_context
    }

    /// Push a `with` scope
    pub fn push_with_scope(&self, object: GcRef<JsObject>) {
        let current = self.current_context();
        *self.current_context.write() = ExecutionContext::with(&current, object);
    }

    /// Push a catch scope binding `name`
    pub fn push_catch_scope(&self, name: Identifier, value: Value) {
        let current = self.current_context();
        *self.current_context.write() = ExecutionContext::catch(&current, name, value);
    }

    /// Pop the innermost scope; the global context stays put
    pub fn pop_scope(&self) -> bool {
        let current = self.current_context();
        match current.outer() {
            Some(outer) => {
                *self.current_context.write() = Arc::clone(outer);
                true
            }
            None => false,
        }
    }

    // ---- exceptions ----------------------------------------------

    /// Throw an arbitrary value, recording it with a stack snapshot
    pub fn throw(&self, value: Value) -> VmError {
        let stack = self.capture_stack();
        let message = match value.as_string() {
            Some(s) => s.as_str().to_string(),
            None => format!("{:?}", value),
        };
        *self.pending_exception.write() = Some(PendingException {
            value: value.clone(),
            stack: stack.clone(),
        });
        self.about_to_throw();
        VmError::Exception(Box::new(ThrownValue {
            value,
            message,
            stack,
        }))
    }

    /// Raise a TypeError
    pub fn throw_type_error(&self, msg: impl Into<String>) -> VmError {
        let msg = msg.into();
        self.record_error(&format!("TypeError: {}", msg));
        VmError::TypeError(msg)
    }

    /// Raise a RangeError
    pub fn throw_range_error(&self, msg: impl Into<String>) -> VmError {
        let msg = msg.into();
        self.record_error(&format!("RangeError: {}", msg));
        VmError::RangeError(msg)
    }

    /// Raise a ReferenceError
    pub fn throw_reference_error(&self, msg: impl Into<String>) -> VmError {
        let msg = msg.into();
        self.record_error(&format!("ReferenceError: {}", msg));
        VmError::ReferenceError(msg)
    }

    fn record_error(&self, message: &str) {
        *self.pending_exception.write() = Some(PendingException {
            value: Value::string(self.intern(message)),
            stack: self.capture_stack(),
        });
        self.about_to_throw();
    }

    /// Break-on-throw safe point. Every throw path lands here after
    /// the pending-exception slot is filled, so a waiting debugger job
    /// observes the exception before the error propagates.
    fn about_to_throw(&self) {
        self.process_debugger_jobs();
    }

    /// Whether an exception is pending
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.read().is_some()
    }

    /// The pending exception value without consuming it. Debugger jobs
    /// use this to inspect a throw at the break-on-throw safe point.
    pub fn pending_exception_value(&self) -> Option<Value> {
        self.pending_exception.read().as_ref().map(|p| p.value.clone())
    }

    /// Take the pending exception, clearing the slot
    pub fn catch_exception(&self) -> Option<Value> {
        self.pending_exception.write().take().map(|p| p.value)
    }

    /// Stack captured with the pending exception, if any
    pub fn pending_stack(&self) -> Option<Vec<StackFrame>> {
        self.pending_exception.read().as_ref().map(|p| p.stack.clone())
    }

    /// Snapshot the current call stack, innermost frame first
    pub fn capture_stack(&self) -> Vec<StackFrame> {
        let mut frames = Vec::new();
        let mut ctx = Some(self.current_context());
        while let Some(c) = ctx {
            if let crate::context::ContextKind::Call(call) = c.kind() {
                let function = call
                    .function()
                    .as_object()
                    .and_then(|o| o.function())
                    .map(|f| {
                        if f.name.is_empty() {
                            "<anonymous>".to_string()
                        } else {
                            f.name.clone()
                        }
                    })
                    .unwrap_or_else(|| "<anonymous>".to_string());
                frames.push(StackFrame { function });
            }
            ctx = c.outer().cloned();
        }
        frames
    }

    // ---- garbage collection --------------------------------------

    /// Run a full collection from the engine's roots
    pub fn collect_garbage(&self) {
        let mut roots: Vec<*const GcHeader> = vec![self.global_object.header_ptr()];
        let mut push = |h: *const GcHeader| roots.push(h);
        self.current_context().trace(&mut push);
        for proto in [
            &self.prototypes.object,
            &self.prototypes.array,
            &self.prototypes.string,
            &self.prototypes.number,
            &self.prototypes.boolean,
            &self.prototypes.date,
            &self.prototypes.function,
        ] {
            roots.push(proto.header_ptr());
        }
        if let Some(pending) = self.pending_exception.read().as_ref() {
            pending.value.trace(&mut |h| roots.push(h));
        }
        self.collector.lock().collect(&roots);
    }

    /// Collect if the heap asks for it
    pub fn maybe_collect(&self) {
        if self.heap.should_gc() {
            self.collect_garbage();
        }
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.collector.lock().stats().clone()
    }

    // ---- debugger ------------------------------------------------

    /// Attach a debugger rendezvous
    pub fn set_debugger(&self, debugger: Arc<DebuggerRendezvous>) {
        *self.debugger.write() = Some(debugger);
    }

    /// Run pending debugger jobs at a safe point
    pub fn process_debugger_jobs(&self) -> bool {
        let debugger = self.debugger.read().clone();
        match debugger {
            Some(d) => d.process(self),
            None => false,
        }
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn adopt(heap: &Arc<GcHeap>, obj: &GcRef<JsObject>) {
    heap.adopt(
        Arc::clone(obj.as_arc()),
        std::mem::size_of::<JsObject>(),
    );
}
