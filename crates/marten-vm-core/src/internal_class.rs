//! Internal classes (shared shapes)
//!
//! An internal class describes the complete named-property layout of
//! every object that reaches it: which identifier sits in which slot,
//! with which attributes, plus the prototype and the dispatch kind.
//! Classes form a DAG rooted at the engine's empty class; every
//! structural operation is a memoized transition, so objects built by
//! the same operation sequence share one class and inline caches can
//! key on class identity alone.
//!
//! Transition edges hold the child weakly (child holds nothing back),
//! so abandoned shapes disappear with their last object.

use crate::gc::{GcHeader, GcRef};
use crate::identifier::Identifier;
use crate::object::JsObject;
use crate::property::PropertyAttributes;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

/// Dispatch selector for the closed set of object kinds.
///
/// Changing an object's dynamic type (say, becoming an Array) is a
/// class transition keyed on this, the moral equivalent of swapping
/// the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// Plain object
    Ordinary,
    /// Array exotic object
    Array,
    /// String wrapper
    String,
    /// Number wrapper
    Number,
    /// Boolean wrapper
    Boolean,
    /// Date object
    Date,
    /// Function object
    Function,
    /// Arguments object
    Arguments,
}

/// One storage slot of a class.
///
/// An accessor member occupies two consecutive slots: the named getter
/// slot and an unnamed setter placeholder.
#[derive(Clone)]
pub struct Member {
    /// Property identifier; `None` marks the setter placeholder slot
    pub name: Option<Identifier>,
    /// Attributes of the property owning this slot
    pub attrs: PropertyAttributes,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Transition {
    AddMember(Identifier, PropertyAttributes),
    ChangeAttributes(Identifier, PropertyAttributes),
    RemoveMember(Identifier),
    PrototypeChange(usize),
    KindChange(DispatchKind),
}

/// A shared shape.
pub struct InternalClass {
    prototype: Option<GcRef<JsObject>>,
    kind: DispatchKind,
    /// Slots in layout order
    members: Vec<Member>,
    /// Identifier -> slot index of its first (or only) slot
    property_map: FxHashMap<Identifier, usize>,
    /// Memoized structural transitions out of this class.
    /// RefCell: transitions are off the IC fast path and the engine is
    /// thread-confined.
    transitions: RefCell<FxHashMap<Transition, Weak<InternalClass>>>,
    /// Lazily derived non-configurable variant
    sealed: RefCell<Option<Arc<InternalClass>>>,
    /// Lazily derived non-configurable, non-writable variant
    frozen: RefCell<Option<Arc<InternalClass>>>,
}

// SAFETY: classes are only mutated from the single engine thread; the
// debugger rendezvous guarantees no concurrent access.
unsafe impl Send for InternalClass {}
unsafe impl Sync for InternalClass {}

impl InternalClass {
    /// Create a root (empty) class for the given kind and prototype.
    ///
    /// The engine creates one canonical root per kind; everything else
    /// should arrive via transitions.
    pub fn empty(kind: DispatchKind, prototype: Option<GcRef<JsObject>>) -> Arc<Self> {
        Arc::new(Self {
            prototype,
            kind,
            members: Vec::new(),
            property_map: FxHashMap::default(),
            transitions: RefCell::new(FxHashMap::default()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
        })
    }

    /// Slot index of `name`, if present
    #[inline]
    pub fn find(&self, name: &Identifier) -> Option<usize> {
        self.property_map.get(name).copied()
    }

    /// Total slot count (accessor members count twice)
    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Attributes of the member at `slot`
    #[inline]
    pub fn attributes_at(&self, slot: usize) -> PropertyAttributes {
        self.members[slot].attrs
    }

    /// Slots in layout order
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// The prototype shared by every object of this class
    pub fn prototype(&self) -> Option<&GcRef<JsObject>> {
        self.prototype.as_ref()
    }

    /// The dispatch kind
    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    /// Report the prototype reference to a mark pass. Objects call
    /// this from their own trace; a class is reachable only through
    /// its objects.
    pub fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        if let Some(proto) = &self.prototype {
            tracer(proto.header_ptr());
        }
    }

    fn lookup_transition(&self, key: &Transition) -> Option<Arc<InternalClass>> {
        self.transitions.borrow().get(key).and_then(Weak::upgrade)
    }

    fn memoize_transition(&self, key: Transition, target: &Arc<InternalClass>) {
        self.transitions
            .borrow_mut()
            .insert(key, Arc::downgrade(target));
    }

    /// Append a member, returning the transition target and the new
    /// member's slot index. If `name` is already present this is an
    /// attribute change instead.
    pub fn add_member(
        self: &Arc<Self>,
        name: &Identifier,
        attrs: PropertyAttributes,
    ) -> (Arc<Self>, usize) {
        if self.property_map.contains_key(name) {
            return self.change_member(name, attrs);
        }

        let key = Transition::AddMember(name.clone(), attrs);
        if let Some(target) = self.lookup_transition(&key) {
            let slot = self.members.len();
            return (target, slot);
        }

        let slot = self.members.len();
        let mut members = self.members.clone();
        members.push(Member {
            name: Some(name.clone()),
            attrs,
        });
        if attrs.is_accessor() {
            members.push(Member { name: None, attrs });
        }
        let mut property_map = self.property_map.clone();
        property_map.insert(name.clone(), slot);

        let target = Arc::new(Self {
            prototype: self.prototype.clone(),
            kind: self.kind,
            members,
            property_map,
            transitions: RefCell::new(FxHashMap::default()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
        });
        self.memoize_transition(key, &target);
        (target, slot)
    }

    /// Change an existing member's attributes, returning the target
    /// class and the member's slot index there. A no-op when the
    /// attributes already match.
    pub fn change_member(
        self: &Arc<Self>,
        name: &Identifier,
        attrs: PropertyAttributes,
    ) -> (Arc<Self>, usize) {
        let slot = match self.find(name) {
            Some(slot) => slot,
            None => return self.add_member(name, attrs),
        };
        if self.members[slot].attrs == attrs {
            return (Arc::clone(self), slot);
        }

        let key = Transition::ChangeAttributes(name.clone(), attrs);
        if let Some(target) = self.lookup_transition(&key) {
            let new_slot = target.find(name).unwrap_or(slot);
            return (target, new_slot);
        }

        // Reapply every member with the one change. Slot widths may
        // shift when a member flips between data and accessor.
        let target = self.rebuild(|member_name, member_attrs| {
            if member_name == name {
                Some(attrs)
            } else {
                Some(member_attrs)
            }
        });
        self.memoize_transition(key, &target);
        let new_slot = target.find(name).unwrap_or(slot);
        (target, new_slot)
    }

    /// Derive the class with `name` removed. The caller owns shifting
    /// object slot storage down.
    pub fn remove_member(self: &Arc<Self>, name: &Identifier) -> Arc<Self> {
        debug_assert!(self.property_map.contains_key(name));

        let key = Transition::RemoveMember(name.clone());
        if let Some(target) = self.lookup_transition(&key) {
            return target;
        }

        let target = self.rebuild(|member_name, member_attrs| {
            if member_name == name {
                None
            } else {
                Some(member_attrs)
            }
        });
        self.memoize_transition(key, &target);
        target
    }

    /// Transition to the same layout under a different prototype
    pub fn change_prototype(self: &Arc<Self>, proto: Option<GcRef<JsObject>>) -> Arc<Self> {
        let proto_addr = proto.as_ref().map(|p| p.addr()).unwrap_or(0);
        let current_addr = self.prototype.as_ref().map(|p| p.addr()).unwrap_or(0);
        if proto_addr == current_addr {
            return Arc::clone(self);
        }

        let key = Transition::PrototypeChange(proto_addr);
        if let Some(target) = self.lookup_transition(&key) {
            return target;
        }

        let target = Arc::new(Self {
            prototype: proto,
            kind: self.kind,
            members: self.members.clone(),
            property_map: self.property_map.clone(),
            transitions: RefCell::new(FxHashMap::default()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
        });
        self.memoize_transition(key, &target);
        target
    }

    /// Transition to the same layout under a different dispatch kind
    pub fn change_kind(self: &Arc<Self>, kind: DispatchKind) -> Arc<Self> {
        if self.kind == kind {
            return Arc::clone(self);
        }

        let key = Transition::KindChange(kind);
        if let Some(target) = self.lookup_transition(&key) {
            return target;
        }

        let target = Arc::new(Self {
            prototype: self.prototype.clone(),
            kind,
            members: self.members.clone(),
            property_map: self.property_map.clone(),
            transitions: RefCell::new(FxHashMap::default()),
            sealed: RefCell::new(None),
            frozen: RefCell::new(None),
        });
        self.memoize_transition(key, &target);
        target
    }

    /// The sealed derivation: every member non-configurable. Cached on
    /// the class; a sealed class is its own sealed derivation.
    pub fn sealed(self: &Arc<Self>) -> Arc<Self> {
        if let Some(cached) = self.sealed.borrow().as_ref() {
            return Arc::clone(cached);
        }

        let already = self.members.iter().all(|m| !m.attrs.is_configurable());
        let target = if already {
            Arc::clone(self)
        } else {
            let derived = self.rebuild(|_, attrs| Some(attrs.sealed()));
            *derived.sealed.borrow_mut() = Some(Arc::clone(&derived));
            derived
        };
        *self.sealed.borrow_mut() = Some(Arc::clone(&target));
        target
    }

    /// The frozen derivation: sealed plus non-writable data members
    pub fn frozen(self: &Arc<Self>) -> Arc<Self> {
        if let Some(cached) = self.frozen.borrow().as_ref() {
            return Arc::clone(cached);
        }

        let already = self
            .members
            .iter()
            .all(|m| !m.attrs.is_configurable() && (m.attrs.is_accessor() || !m.attrs.is_writable()));
        let target = if already {
            Arc::clone(self)
        } else {
            let derived = self.rebuild(|_, attrs| Some(attrs.frozen()));
            *derived.sealed.borrow_mut() = Some(Arc::clone(&derived));
            *derived.frozen.borrow_mut() = Some(Arc::clone(&derived));
            derived
        };
        *self.frozen.borrow_mut() = Some(Arc::clone(&target));
        target
    }

    /// Rebuild from a fresh root, reapplying named members in layout
    /// order through `map` (None drops the member). The join point for
    /// every layout-shifting derivation.
    fn rebuild<F>(&self, map: F) -> Arc<Self>
    where
        F: Fn(&Identifier, PropertyAttributes) -> Option<PropertyAttributes>,
    {
        let mut class = Self::empty(self.kind, self.prototype.clone());
        for member in &self.members {
            let Some(name) = &member.name else {
                continue; // setter placeholder, carried by its getter
            };
            if let Some(attrs) = map(name, member.attrs) {
                class = class.add_member(name, attrs).0;
            }
        }
        class
    }
}

impl std::fmt::Debug for InternalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalClass")
            .field("kind", &self.kind)
            .field("size", &self.members.len())
            .finish()
    }
}
