//! Execution contexts and name resolution
//!
//! Contexts form a chain from the innermost scope out to the global
//! context. Unqualified name resolution walks the chain: `with` scopes
//! consult their object, catch scopes bind one name, call scopes bind
//! parameters and locals, and the global context falls through to the
//! global object.

use crate::engine::ExecutionEngine;
use crate::error::{VmError, VmResult};
use crate::gc::GcRef;
use crate::identifier::Identifier;
use crate::object::JsObject;
use crate::value::Value;
use marten_vm_gc::GcHeader;
use parking_lot::RwLock;
use std::sync::Arc;

/// Maximum context nesting before a call raises a stack overflow
pub const MAX_STACK_DEPTH: usize = 1000;

/// Activation state of one function call.
///
/// Parameters occupy the first `formal_count` locals; the arguments
/// object aliases them while its mapping is intact.
pub struct CallContext {
    function: Value,
    this_value: Value,
    args: Vec<Value>,
    formal_names: Vec<Identifier>,
    locals: RwLock<Vec<Value>>,
    strict: bool,
}

impl CallContext {
    /// Create an activation. Missing arguments pad with undefined;
    /// surplus arguments stay reachable through the arguments object
    /// only.
    pub fn new(
        function: Value,
        this_value: Value,
        args: Vec<Value>,
        formal_names: Vec<Identifier>,
        strict: bool,
    ) -> Self {
        let mut locals = Vec::with_capacity(formal_names.len());
        for i in 0..formal_names.len() {
            locals.push(args.get(i).cloned().unwrap_or_else(Value::undefined));
        }
        Self {
            function,
            this_value,
            args,
            formal_names,
            locals: RwLock::new(locals),
            strict,
        }
    }

    /// The callee
    pub fn function(&self) -> &Value {
        &self.function
    }

    /// The `this` binding
    pub fn this_value(&self) -> &Value {
        &self.this_value
    }

    /// Arguments as passed at the call site
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Call-site argument count
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Declared parameter count
    pub fn formal_count(&self) -> usize {
        self.formal_names.len()
    }

    /// Whether the callee is strict code
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Read local `i` (undefined when out of range)
    pub fn local(&self, i: usize) -> Value {
        self.locals
            .read()
            .get(i)
            .cloned()
            .unwrap_or_else(Value::undefined)
    }

    /// Write local `i`
    pub fn set_local(&self, i: usize, value: Value) {
        if let Some(slot) = self.locals.write().get_mut(i) {
            *slot = value;
        }
    }

    fn local_index_of(&self, name: &Identifier) -> Option<usize> {
        // Duplicate parameter names bind to the last occurrence
        self.formal_names.iter().rposition(|n| n == name)
    }

    /// Report held managed references to a mark pass
    pub fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        self.function.trace(tracer);
        self.this_value.trace(tracer);
        for v in &self.args {
            v.trace(tracer);
        }
        for v in self.locals.read().iter() {
            v.trace(tracer);
        }
    }
}

/// What a context contributes to name resolution
pub enum ContextKind {
    /// Outermost scope, backed by the global object
    Global {
        /// The global object
        global: GcRef<JsObject>,
    },
    /// A function activation
    Call(Arc<CallContext>),
    /// A catch clause binding exactly one name
    Catch {
        /// The bound exception name
        name: Identifier,
        /// The caught value (assignable)
        value: RwLock<Value>,
    },
    /// A `with` scope consulting its object first
    With {
        /// The scope object
        object: GcRef<JsObject>,
    },
}

/// One link of the scope chain
pub struct ExecutionContext {
    kind: ContextKind,
    outer: Option<Arc<ExecutionContext>>,
}

impl ExecutionContext {
    /// Create the outermost, global context
    pub fn global(global: GcRef<JsObject>) -> Arc<Self> {
        Arc::new(Self {
            kind: ContextKind::Global { global },
            outer: None,
        })
    }

    /// Push a call scope
    pub fn call(outer: &Arc<Self>, context: Arc<CallContext>) -> Arc<Self> {
        Arc::new(Self {
            kind: ContextKind::Call(context),
            outer: Some(Arc::clone(outer)),
        })
    }

    /// Push a catch scope
    pub fn catch(outer: &Arc<Self>, name: Identifier, value: Value) -> Arc<Self> {
        Arc::new(Self {
            kind: ContextKind::Catch {
                name,
                value: RwLock::new(value),
            },
            outer: Some(Arc::clone(outer)),
        })
    }

    /// Push a with scope
    pub fn with(outer: &Arc<Self>, object: GcRef<JsObject>) -> Arc<Self> {
        Arc::new(Self {
            kind: ContextKind::With { object },
            outer: Some(Arc::clone(outer)),
        })
    }

    /// The context kind
    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    /// The enclosing context
    pub fn outer(&self) -> Option<&Arc<ExecutionContext>> {
        self.outer.as_ref()
    }

    /// Chain depth including this link
    pub fn depth(&self) -> usize {
        1 + self.outer.as_ref().map(|o| o.depth()).unwrap_or(0)
    }

    /// Whether the innermost function scope is strict code
    pub fn strict(&self) -> bool {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let ContextKind::Call(call) = &c.kind {
                return call.strict();
            }
            ctx = c.outer.as_deref();
        }
        false
    }

    /// The current activation, if any
    pub fn call_context(&self) -> Option<&Arc<CallContext>> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let ContextKind::Call(call) = &c.kind {
                return Some(call);
            }
            ctx = c.outer.as_deref();
        }
        None
    }

    /// The global object at the end of the chain
    pub fn global_object(&self) -> Option<GcRef<JsObject>> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let ContextKind::Global { global } = &c.kind {
                return Some(global.clone());
            }
            ctx = c.outer.as_deref();
        }
        None
    }

    /// Resolve an unqualified name. An unresolvable name is a
    /// ReferenceError, unlike property access on an object.
    pub fn get_property(&self, engine: &ExecutionEngine, name: &Identifier) -> VmResult<Value> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            match &c.kind {
                ContextKind::With { object } => {
                    if object.query(engine, name).is_some() {
                        let receiver = Value::object(object.clone());
                        return object.get(engine, name, &receiver);
                    }
                }
                ContextKind::Catch {
                    name: bound,
                    value,
                } => {
                    if bound == name {
                        return Ok(value.read().clone());
                    }
                }
                ContextKind::Call(call) => {
                    if let Some(i) = call.local_index_of(name) {
                        return Ok(call.local(i));
                    }
                }
                ContextKind::Global { global } => {
                    if global.query(engine, name).is_some() {
                        let receiver = Value::object(global.clone());
                        return global.get(engine, name, &receiver);
                    }
                }
            }
            ctx = c.outer.as_deref();
        }
        Err(VmError::reference_error(format!(
            "{} is not defined",
            name.as_str()
        )))
    }

    /// Assign to an unqualified name. An unresolvable name becomes an
    /// implicit global in sloppy code and a ReferenceError in strict
    /// code.
    pub fn set_property(
        &self,
        engine: &ExecutionEngine,
        name: &Identifier,
        value: Value,
    ) -> VmResult<()> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            match &c.kind {
                ContextKind::With { object } => {
                    if object.query(engine, name).is_some() {
                        let receiver = Value::object(object.clone());
                        object.put(engine, name, value, &receiver)?;
                        return Ok(());
                    }
                }
                ContextKind::Catch {
                    name: bound,
                    value: slot,
                } => {
                    if bound == name {
                        *slot.write() = value;
                        return Ok(());
                    }
                }
                ContextKind::Call(call) => {
                    if let Some(i) = call.local_index_of(name) {
                        call.set_local(i, value);
                        return Ok(());
                    }
                }
                ContextKind::Global { global } => {
                    let receiver = Value::object(global.clone());
                    if global.query(engine, name).is_some() {
                        global.put(engine, name, value, &receiver)?;
                        return Ok(());
                    }
                    if self.strict() {
                        return Err(VmError::reference_error(format!(
                            "{} is not defined",
                            name.as_str()
                        )));
                    }
                    global.put(engine, name, value, &receiver)?;
                    return Ok(());
                }
            }
            ctx = c.outer.as_deref();
        }
        unreachable!("scope chain always ends in a global context")
    }

    /// `delete name`. Scope bindings are not deletable; only with
    /// objects and the global object can lose a property this way.
    pub fn delete_property(&self, engine: &ExecutionEngine, name: &Identifier) -> bool {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            match &c.kind {
                ContextKind::With { object } => {
                    if object.query(engine, name).is_some() {
                        return object.delete_property(engine, name);
                    }
                }
                ContextKind::Catch { name: bound, .. } => {
                    if bound == name {
                        return false;
                    }
                }
                ContextKind::Call(call) => {
                    if call.local_index_of(name).is_some() {
                        return false;
                    }
                }
                ContextKind::Global { global } => {
                    if global.query(engine, name).is_some() {
                        return global.delete_property(engine, name);
                    }
                    return true;
                }
            }
            ctx = c.outer.as_deref();
        }
        true
    }

    /// Report held managed references to a mark pass
    pub fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        match &self.kind {
            ContextKind::Global { global } => tracer(global.header_ptr()),
            ContextKind::Call(call) => call.trace(tracer),
            ContextKind::Catch { value, .. } => value.read().trace(tracer),
            ContextKind::With { object } => tracer(object.header_ptr()),
        }
        if let Some(outer) = &self.outer {
            outer.trace(tracer);
        }
    }
}
