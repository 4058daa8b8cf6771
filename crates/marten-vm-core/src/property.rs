//! Property attributes and descriptors

use crate::value::Value;
use bitflags::bitflags;

bitflags! {
    /// Packed per-property attribute bits.
    ///
    /// Accessor properties ignore `WRITABLE`; the presence of a setter
    /// governs writability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyAttributes: u8 {
        /// Value may be changed with an ordinary put
        const WRITABLE = 1 << 0;
        /// Visible to for-in enumeration
        const ENUMERABLE = 1 << 1;
        /// May be deleted or have its attributes changed
        const CONFIGURABLE = 1 << 2;
        /// Getter/setter pair instead of a stored value
        const ACCESSOR = 1 << 3;
    }
}

impl PropertyAttributes {
    /// ECMAScript default attributes for a created data property
    pub const fn default_data() -> Self {
        Self::WRITABLE
            .union(Self::ENUMERABLE)
            .union(Self::CONFIGURABLE)
    }

    /// ECMAScript default attributes for a created accessor property
    pub const fn default_accessor() -> Self {
        Self::ACCESSOR
            .union(Self::ENUMERABLE)
            .union(Self::CONFIGURABLE)
    }

    /// Whether this is a data property
    #[inline]
    pub fn is_data(self) -> bool {
        !self.contains(Self::ACCESSOR)
    }

    /// Whether this is an accessor property
    #[inline]
    pub fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }

    /// Whether an ordinary put may overwrite the value
    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Whether the property shows up in enumeration
    #[inline]
    pub fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    /// Whether the property may be deleted or reshaped
    #[inline]
    pub fn is_configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    /// The attributes after sealing: non-configurable
    pub fn sealed(self) -> Self {
        self.difference(Self::CONFIGURABLE)
    }

    /// The attributes after freezing: non-configurable, and for data
    /// properties non-writable
    pub fn frozen(self) -> Self {
        let mut attrs = self.difference(Self::CONFIGURABLE);
        if attrs.is_data() {
            attrs.remove(Self::WRITABLE);
        }
        attrs
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::default_data()
    }
}

/// A (possibly partial) property descriptor.
///
/// `None` fields are "absent" in the ECMAScript sense; they stay
/// untouched by a redefinition and resolve to defaults on creation.
#[derive(Clone, Debug, Default)]
pub struct PropertyDescriptor {
    /// \[\[Value]]
    pub value: Option<Value>,
    /// \[\[Get]] — `Some(undefined)` is an explicitly absent getter
    pub get: Option<Value>,
    /// \[\[Set]] — `Some(undefined)` is an explicitly absent setter
    pub set: Option<Value>,
    /// \[\[Writable]]
    pub writable: Option<bool>,
    /// \[\[Enumerable]]
    pub enumerable: Option<bool>,
    /// \[\[Configurable]]
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// A full data descriptor with default attributes
    pub fn data(value: Value) -> Self {
        Self {
            value: Some(value),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(true),
            ..Self::default()
        }
    }

    /// A data descriptor carrying explicit attributes
    pub fn data_with_attrs(value: Value, attrs: PropertyAttributes) -> Self {
        Self {
            value: Some(value),
            writable: Some(attrs.is_writable()),
            enumerable: Some(attrs.is_enumerable()),
            configurable: Some(attrs.is_configurable()),
            ..Self::default()
        }
    }

    /// A full accessor descriptor with default attributes
    pub fn accessor(get: Value, set: Value) -> Self {
        Self {
            get: Some(get),
            set: Some(set),
            enumerable: Some(true),
            configurable: Some(true),
            ..Self::default()
        }
    }

    /// Whether any accessor field is present
    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    /// Whether any data field is present
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    /// Neither data nor accessor fields present
    pub fn is_generic(&self) -> bool {
        !self.is_accessor() && !self.is_data()
    }

    /// Resolve the attribute bits, applying ECMAScript defaults for
    /// absent fields.
    pub fn resolved_attributes(&self) -> PropertyAttributes {
        let mut attrs = PropertyAttributes::empty();
        if self.is_accessor() {
            attrs |= PropertyAttributes::ACCESSOR;
        } else if self.writable.unwrap_or(false) {
            attrs |= PropertyAttributes::WRITABLE;
        }
        if self.enumerable.unwrap_or(false) {
            attrs |= PropertyAttributes::ENUMERABLE;
        }
        if self.configurable.unwrap_or(false) {
            attrs |= PropertyAttributes::CONFIGURABLE;
        }
        attrs
    }

    /// Fill every absent field with its default, making this a fully
    /// populated descriptor.
    pub fn complete(&mut self) {
        if self.is_accessor() {
            self.get.get_or_insert_with(Value::undefined);
            self.set.get_or_insert_with(Value::undefined);
        } else {
            self.value.get_or_insert_with(Value::undefined);
            self.writable.get_or_insert(false);
        }
        self.enumerable.get_or_insert(false);
        self.configurable.get_or_insert(false);
    }

    /// Whether applying this descriptor over `current` (which must be
    /// fully populated) is permitted. Everything goes while the
    /// property is configurable; afterwards only compatible
    /// refinements (like clearing writability) remain legal.
    pub fn can_replace(&self, current: &PropertyDescriptor) -> bool {
        if self.changes_nothing(current) {
            return true;
        }
        if current.configurable == Some(true) {
            return true;
        }

        if self.configurable == Some(true) {
            return false;
        }
        if let Some(e) = self.enumerable {
            if current.enumerable != Some(e) {
                return false;
            }
        }
        if self.is_generic() {
            return true;
        }

        let current_accessor = current.get.is_some() || current.set.is_some();
        if current_accessor != self.is_accessor() {
            return false;
        }
        if current_accessor {
            let same = |ours: &Option<Value>, theirs: &Option<Value>| match ours {
                None => true,
                Some(v) => theirs.as_ref().is_some_and(|t| v.same_value(t)),
            };
            return same(&self.get, &current.get) && same(&self.set, &current.set);
        }

        if current.writable == Some(true) {
            return true;
        }
        if self.writable == Some(true) {
            return false;
        }
        match &self.value {
            None => true,
            Some(v) => current.value.as_ref().is_some_and(|c| v.same_value(c)),
        }
    }

    /// Overlay this (partial) descriptor onto `current`, producing the
    /// fully populated descriptor the property ends up with. A data
    /// descriptor over an accessor (or vice versa) replaces the whole
    /// kind, resetting the other side's fields to defaults.
    pub fn merge_over(&self, current: &PropertyDescriptor) -> PropertyDescriptor {
        let mut merged = current.clone();
        if self.is_accessor() {
            merged.value = None;
            merged.writable = None;
            if let Some(g) = &self.get {
                merged.get = Some(g.clone());
            }
            if let Some(s) = &self.set {
                merged.set = Some(s.clone());
            }
        } else if self.is_data() {
            merged.get = None;
            merged.set = None;
            if let Some(v) = &self.value {
                merged.value = Some(v.clone());
            }
            if let Some(w) = self.writable {
                merged.writable = Some(w);
            }
        }
        if let Some(e) = self.enumerable {
            merged.enumerable = Some(e);
        }
        if let Some(c) = self.configurable {
            merged.configurable = Some(c);
        }
        merged.complete();
        merged
    }

    /// The is-subset fast path of the reconciliation algorithm: every
    /// present field equals the corresponding field of `current`
    /// (which must be fully populated), so applying this descriptor
    /// changes nothing observable.
    pub fn changes_nothing(&self, current: &PropertyDescriptor) -> bool {
        let same_opt = |ours: &Option<Value>, theirs: &Option<Value>| match (ours, theirs) {
            (None, _) => true,
            (Some(a), Some(b)) => a.same_value(b),
            (Some(_), None) => false,
        };
        same_opt(&self.value, &current.value)
            && same_opt(&self.get, &current.get)
            && same_opt(&self.set, &current.set)
            && self.writable.is_none_or(|w| current.writable == Some(w))
            && self.enumerable.is_none_or(|e| current.enumerable == Some(e))
            && self
                .configurable
                .is_none_or(|c| current.configurable == Some(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_attributes() {
        let data = PropertyAttributes::default_data();
        assert!(data.is_writable() && data.is_enumerable() && data.is_configurable());
        assert!(data.is_data());

        let accessor = PropertyAttributes::default_accessor();
        assert!(accessor.is_accessor());
        assert!(!accessor.is_writable());
    }

    #[test]
    fn test_sealed_and_frozen_variants() {
        let data = PropertyAttributes::default_data();
        assert!(!data.sealed().is_configurable());
        assert!(data.sealed().is_writable());
        assert!(!data.frozen().is_writable());

        // Freezing leaves accessor writability alone (it has none)
        let accessor = PropertyAttributes::default_accessor();
        assert!(accessor.frozen().is_accessor());
        assert!(!accessor.frozen().is_configurable());
    }

    #[test]
    fn test_descriptor_classification() {
        assert!(PropertyDescriptor::data(Value::int32(1)).is_data());
        assert!(!PropertyDescriptor::data(Value::int32(1)).is_accessor());
        assert!(
            PropertyDescriptor::accessor(Value::undefined(), Value::undefined()).is_accessor()
        );
        assert!(PropertyDescriptor::default().is_generic());
    }

    #[test]
    fn test_resolved_attribute_defaults() {
        // Absent fields default to false when completed
        let desc = PropertyDescriptor {
            value: Some(Value::int32(1)),
            ..Default::default()
        };
        let attrs = desc.resolved_attributes();
        assert!(!attrs.is_writable());
        assert!(!attrs.is_enumerable());
        assert!(!attrs.is_configurable());
    }

    #[test]
    fn test_can_replace_non_configurable() {
        let mut current = PropertyDescriptor::data(Value::int32(1));
        current.configurable = Some(false);
        current.complete();

        // Tightening writability is always allowed
        let tighten = PropertyDescriptor {
            writable: Some(false),
            ..Default::default()
        };
        assert!(tighten.can_replace(&current));

        // Raising configurable back is not
        let raise = PropertyDescriptor {
            configurable: Some(true),
            ..Default::default()
        };
        assert!(!raise.can_replace(&current));

        // Kind flip on a non-configurable property is rejected
        let flip = PropertyDescriptor::accessor(Value::undefined(), Value::undefined());
        assert!(!flip.can_replace(&current));

        // Same value is a no-op, hence allowed
        let same = PropertyDescriptor {
            value: Some(Value::int32(1)),
            ..Default::default()
        };
        current.writable = Some(false);
        assert!(same.can_replace(&current));
        let different = PropertyDescriptor {
            value: Some(Value::int32(2)),
            ..Default::default()
        };
        assert!(!different.can_replace(&current));
    }

    #[test]
    fn test_merge_over_kind_flip() {
        let mut current = PropertyDescriptor::data(Value::int32(1));
        current.complete();

        let desc = PropertyDescriptor {
            get: Some(Value::undefined()),
            ..Default::default()
        };
        let merged = desc.merge_over(&current);
        assert!(merged.get.is_some());
        assert!(merged.value.is_none());
        assert!(merged.writable.is_none());
        // Untouched attributes survive the flip
        assert_eq!(merged.enumerable, Some(true));
        assert_eq!(merged.configurable, Some(true));
    }

    #[test]
    fn test_changes_nothing() {
        let mut current = PropertyDescriptor::data(Value::int32(5));
        current.complete();

        let same = PropertyDescriptor {
            value: Some(Value::int32(5)),
            ..Default::default()
        };
        assert!(same.changes_nothing(&current));

        let different = PropertyDescriptor {
            value: Some(Value::int32(6)),
            ..Default::default()
        };
        assert!(!different.changes_nothing(&current));

        // Empty descriptor changes nothing by definition
        assert!(PropertyDescriptor::default().changes_nothing(&current));
    }
}
