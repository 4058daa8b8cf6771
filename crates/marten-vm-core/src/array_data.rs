//! Indexed element storage
//!
//! Every object may carry indexed elements in one of two layouts:
//!
//! - [`SimpleArrayData`]: a circular buffer for dense data. `offset`
//!   makes shift/unshift O(1); holes are [`Value::empty`] slots.
//! - [`SparseArrayData`]: a B-tree from index to slot in a slot arena,
//!   with a free list so deleted slots are reused instead of leaking.
//!
//! Writes far beyond the dense allocation convert Simple to Sparse;
//! the two layouts are observably identical through the protocol.
//!
//! Per-element attributes are allocated lazily: most arrays never
//! touch them and pay nothing.

use crate::error::VmResult;
use crate::property::PropertyAttributes;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Dense allocations never shrink below this
const MIN_ALLOC: usize = 8;

/// Indices above this never force a dense allocation on their own
const SPARSE_INDEX_THRESHOLD: u32 = 0x1000;

/// Indexed element storage in one of two layouts
pub enum ArrayData {
    /// Dense circular buffer
    Simple(SimpleArrayData),
    /// Index tree over a slot arena
    Sparse(SparseArrayData),
}

/// Dense element storage.
///
/// Logical index `i` lives at physical position `(offset + i) % alloc`;
/// the attribute vector, when present, uses the same mapping.
pub struct SimpleArrayData {
    values: Vec<Value>,
    attrs: Option<Vec<PropertyAttributes>>,
    offset: usize,
    len: u32,
}

/// Sparse element storage: a map from index to arena slot
pub struct SparseArrayData {
    slots: Vec<Value>,
    attrs: Option<Vec<PropertyAttributes>>,
    tree: BTreeMap<u32, usize>,
    free_list: Vec<usize>,
}

impl SimpleArrayData {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            attrs: None,
            offset: 0,
            len: 0,
        }
    }

    #[inline]
    fn alloc(&self) -> usize {
        self.values.len()
    }

    #[inline]
    fn map(&self, index: u32) -> usize {
        debug_assert!((index as usize) < self.alloc());
        (self.offset + index as usize) % self.alloc()
    }

    fn get(&self, index: u32) -> Option<Value> {
        if index >= self.len {
            return None;
        }
        let v = &self.values[self.map(index)];
        if v.is_empty() { None } else { Some(v.clone()) }
    }

    fn attribute(&self, index: u32) -> Option<PropertyAttributes> {
        if self.get(index).is_none() {
            return None;
        }
        Some(match &self.attrs {
            Some(attrs) => attrs[self.map(index)],
            None => PropertyAttributes::default_data(),
        })
    }

    fn ensure_attrs(&mut self) {
        if self.attrs.is_none() {
            self.attrs = Some(vec![PropertyAttributes::default_data(); self.alloc()]);
        }
    }

    /// Grow to hold at least `needed` elements, unwinding the circular
    /// mapping so logical and physical order coincide again.
    fn realloc(&mut self, needed: usize) {
        let new_alloc = needed.max(MIN_ALLOC).next_power_of_two();
        if new_alloc <= self.alloc() && self.offset == 0 {
            return;
        }

        let mut values = vec![Value::empty(); new_alloc];
        let mut attrs = self
            .attrs
            .as_ref()
            .map(|_| vec![PropertyAttributes::default_data(); new_alloc]);
        for i in 0..self.len {
            let from = self.map(i);
            values[i as usize] = std::mem::replace(&mut self.values[from], Value::empty());
            if let (Some(new_attrs), Some(old_attrs)) = (attrs.as_mut(), self.attrs.as_ref()) {
                new_attrs[i as usize] = old_attrs[from];
            }
        }
        self.values = values;
        self.attrs = attrs;
        self.offset = 0;
    }
}

impl SparseArrayData {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            attrs: None,
            tree: BTreeMap::new(),
            free_list: Vec::new(),
        }
    }

    fn allocate_slot(&mut self) -> usize {
        if let Some(slot) = self.free_list.pop() {
            return slot;
        }
        self.slots.push(Value::empty());
        if let Some(attrs) = &mut self.attrs {
            attrs.push(PropertyAttributes::default_data());
        }
        self.slots.len() - 1
    }

    fn release_slot(&mut self, slot: usize) {
        self.slots[slot] = Value::empty();
        if let Some(attrs) = &mut self.attrs {
            attrs[slot] = PropertyAttributes::default_data();
        }
        self.free_list.push(slot);
    }

    fn get(&self, index: u32) -> Option<Value> {
        self.tree.get(&index).map(|&slot| self.slots[slot].clone())
    }

    fn attribute(&self, index: u32) -> Option<PropertyAttributes> {
        let slot = *self.tree.get(&index)?;
        Some(match &self.attrs {
            Some(attrs) => attrs[slot],
            None => PropertyAttributes::default_data(),
        })
    }

    fn ensure_attrs(&mut self) {
        if self.attrs.is_none() {
            self.attrs = Some(vec![PropertyAttributes::default_data(); self.slots.len()]);
        }
    }
}

impl ArrayData {
    /// Fresh dense storage
    pub fn new() -> Self {
        Self::Simple(SimpleArrayData::new())
    }

    /// Whether the sparse layout is active
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// The element at `index`, or `None` for a hole or out of range
    pub fn get(&self, index: u32) -> Option<Value> {
        match self {
            Self::Simple(s) => s.get(index),
            Self::Sparse(s) => s.get(index),
        }
    }

    /// Attributes of the element at `index`, if one is present
    pub fn attribute(&self, index: u32) -> Option<PropertyAttributes> {
        match self {
            Self::Simple(s) => s.attribute(index),
            Self::Sparse(s) => s.attribute(index),
        }
    }

    /// Store `value` at `index`, growing or converting layout as needed
    pub fn put(&mut self, index: u32, value: Value) {
        self.put_with_attrs(index, value, None);
    }

    /// Store `value` at `index` with explicit attributes
    pub fn put_with_attrs(
        &mut self,
        index: u32,
        value: Value,
        attrs: Option<PropertyAttributes>,
    ) {
        if let Self::Simple(s) = self {
            if index as usize >= s.alloc() {
                if index > SPARSE_INDEX_THRESHOLD && index as usize > 2 * s.alloc() {
                    self.sparsify();
                } else {
                    s.realloc(index as usize + 1);
                }
            }
        }

        match self {
            Self::Simple(s) => {
                let pos = s.map(index);
                s.values[pos] = value;
                if index >= s.len {
                    s.len = index + 1;
                }
                if let Some(a) = attrs {
                    s.ensure_attrs();
                    let pos = s.map(index);
                    if let Some(vec) = &mut s.attrs {
                        vec[pos] = a;
                    }
                } else if let Some(vec) = &mut s.attrs {
                    let pos = (s.offset + index as usize) % vec.len();
                    vec[pos] = PropertyAttributes::default_data();
                }
            }
            Self::Sparse(s) => {
                let slot = match s.tree.get(&index) {
                    Some(&slot) => slot,
                    None => {
                        let slot = s.allocate_slot();
                        s.tree.insert(index, slot);
                        slot
                    }
                };
                s.slots[slot] = value;
                if let Some(a) = attrs {
                    s.ensure_attrs();
                    if let Some(vec) = &mut s.attrs {
                        vec[slot] = a;
                    }
                } else if let Some(vec) = &mut s.attrs {
                    vec[slot] = PropertyAttributes::default_data();
                }
            }
        }
    }

    /// Set the attributes of an existing element
    pub fn set_attribute(&mut self, index: u32, attrs: PropertyAttributes) {
        match self {
            Self::Simple(s) => {
                if s.get(index).is_some() {
                    s.ensure_attrs();
                    let pos = s.map(index);
                    if let Some(vec) = &mut s.attrs {
                        vec[pos] = attrs;
                    }
                }
            }
            Self::Sparse(s) => {
                if let Some(&slot) = s.tree.get(&index) {
                    s.ensure_attrs();
                    if let Some(vec) = &mut s.attrs {
                        vec[slot] = attrs;
                    }
                }
            }
        }
    }

    /// Remove the element at `index`. Returns false only when a
    /// non-configurable element blocks the deletion; deleting a hole
    /// succeeds.
    pub fn del(&mut self, index: u32) -> bool {
        match self.attribute(index) {
            None => return true,
            Some(attrs) if !attrs.is_configurable() => return false,
            Some(_) => {}
        }
        match self {
            Self::Simple(s) => {
                let pos = s.map(index);
                s.values[pos] = Value::empty();
                if let Some(vec) = &mut s.attrs {
                    vec[pos] = PropertyAttributes::default_data();
                }
            }
            Self::Sparse(s) => {
                if let Some(slot) = s.tree.remove(&index) {
                    s.release_slot(slot);
                }
            }
        }
        true
    }

    /// One past the highest stored index (holes included for dense
    /// storage)
    pub fn length(&self) -> u32 {
        match self {
            Self::Simple(s) => s.len,
            Self::Sparse(s) => s.tree.last_key_value().map(|(&k, _)| k + 1).unwrap_or(0),
        }
    }

    /// Present indices in ascending order
    pub fn present_indices(&self) -> Vec<u32> {
        match self {
            Self::Simple(s) => (0..s.len).filter(|&i| s.get(i).is_some()).collect(),
            Self::Sparse(s) => s.tree.keys().copied().collect(),
        }
    }

    /// Copy up to `n` leading entries of `src` in after the current
    /// length. Holes in the copied range stay holes; attributes do not
    /// carry over.
    pub fn append(&mut self, src: &ArrayData, n: u32) {
        let start = self.length();
        let count = n.min(src.length()).min(u32::MAX - start);
        if count == 0 {
            return;
        }
        match src {
            Self::Simple(s) => {
                if let Self::Simple(d) = self {
                    // Bulk path: one grow, then the source's two
                    // contiguous runs around its wraparound point.
                    d.realloc(start as usize + count as usize);
                    let first = (s.alloc() - s.offset).min(count as usize);
                    let dst = start as usize;
                    d.values[dst..dst + first]
                        .clone_from_slice(&s.values[s.offset..s.offset + first]);
                    d.values[dst + first..dst + count as usize]
                        .clone_from_slice(&s.values[..count as usize - first]);
                    d.len = start + count;
                    return;
                }
                for i in 0..count {
                    if let Some(v) = s.get(i) {
                        self.put(start + i, v);
                    }
                }
            }
            Self::Sparse(s) => {
                for (&k, &slot) in s.tree.range(..count) {
                    self.put(start + k, s.slots[slot].clone());
                }
            }
        }
    }

    /// Prepend values, shifting existing indices up by `values.len()`.
    /// Returns false without mutating when the shift would push an
    /// index out of the u32 range.
    pub fn push_front(&mut self, values: &[Value]) -> bool {
        if values.is_empty() {
            return true;
        }
        if values.len() > u32::MAX as usize {
            return false;
        }
        let n = values.len() as u32;
        if self.length().checked_add(n).is_none() {
            return false;
        }
        match self {
            Self::Simple(s) => {
                let needed = s.len as usize + values.len();
                if needed > s.alloc() {
                    s.realloc(needed);
                }
                let alloc = s.alloc();
                s.offset = (s.offset + alloc - values.len()) % alloc;
                s.len += n;
                for (i, v) in values.iter().enumerate() {
                    let pos = s.map(i as u32);
                    s.values[pos] = v.clone();
                    if let Some(vec) = &mut s.attrs {
                        vec[pos] = PropertyAttributes::default_data();
                    }
                }
            }
            Self::Sparse(s) => {
                let shifted: BTreeMap<u32, usize> =
                    s.tree.iter().map(|(&k, &v)| (k + n, v)).collect();
                s.tree = shifted;
                for (i, v) in values.iter().enumerate() {
                    let slot = s.allocate_slot();
                    s.slots[slot] = v.clone();
                    s.tree.insert(i as u32, slot);
                }
            }
        }
        true
    }

    /// Remove and return the element at index 0, shifting everything
    /// down. `None` means index 0 was a hole (it is still consumed).
    pub fn pop_front(&mut self) -> Option<Value> {
        match self {
            Self::Simple(s) => {
                if s.len == 0 {
                    return None;
                }
                let pos = s.map(0);
                let value = std::mem::replace(&mut s.values[pos], Value::empty());
                if let Some(vec) = &mut s.attrs {
                    vec[pos] = PropertyAttributes::default_data();
                }
                s.offset = (s.offset + 1) % s.alloc();
                s.len -= 1;
                if value.is_empty() { None } else { Some(value) }
            }
            Self::Sparse(s) => {
                let value = s.tree.remove(&0).map(|slot| {
                    let v = s.slots[slot].clone();
                    s.release_slot(slot);
                    v
                });
                let shifted: BTreeMap<u32, usize> =
                    s.tree.iter().map(|(&k, &v)| (k - 1, v)).collect();
                s.tree = shifted;
                value
            }
        }
    }

    /// Drop every element at or above `new_len`, scanning downward.
    /// A non-configurable element stops the scan; the return value is
    /// the length actually achieved (`index + 1` of the survivor).
    pub fn truncate(&mut self, new_len: u32) -> u32 {
        match self {
            Self::Simple(s) => {
                if new_len >= s.len {
                    return new_len;
                }
                let mut i = s.len;
                while i > new_len {
                    i -= 1;
                    if let Some(attrs) = s.attribute(i) {
                        if !attrs.is_configurable() {
                            s.len = i + 1;
                            return i + 1;
                        }
                    }
                    let pos = s.map(i);
                    s.values[pos] = Value::empty();
                    if let Some(vec) = &mut s.attrs {
                        vec[pos] = PropertyAttributes::default_data();
                    }
                }
                s.len = new_len;
                new_len
            }
            Self::Sparse(s) => {
                let doomed: Vec<u32> = s
                    .tree
                    .range(new_len..)
                    .rev()
                    .map(|(&k, _)| k)
                    .collect();
                for index in doomed {
                    if let Some(attrs) = s.attribute(index) {
                        if !attrs.is_configurable() {
                            return index + 1;
                        }
                    }
                    if let Some(slot) = s.tree.remove(&index) {
                        s.release_slot(slot);
                    }
                }
                new_len
            }
        }
    }

    /// Convert dense storage to the sparse layout, preserving every
    /// element and its attributes.
    pub fn sparsify(&mut self) {
        let Self::Simple(simple) = self else {
            return;
        };
        let mut sparse = SparseArrayData::new();
        if simple.attrs.is_some() {
            sparse.ensure_attrs();
        }
        for i in 0..simple.len {
            if simple.get(i).is_none() {
                continue;
            }
            let pos = simple.map(i);
            let slot = sparse.allocate_slot();
            sparse.slots[slot] = std::mem::replace(&mut simple.values[pos], Value::empty());
            if let (Some(dst), Some(src)) = (sparse.attrs.as_mut(), simple.attrs.as_ref()) {
                dst[slot] = src[pos];
            }
            sparse.tree.insert(i, slot);
        }
        *self = Self::Sparse(sparse);
    }

    /// Sort the first `len` elements in place with a fallible
    /// comparator. Defined values come first in comparator order, then
    /// undefined, then holes; elements at or above `len` are left
    /// untouched. Per-element attributes in the sorted region reset to
    /// defaults (callers avoid sorting through attributed elements).
    pub fn sort(
        &mut self,
        len: u32,
        compare: &mut dyn FnMut(&Value, &Value) -> VmResult<Ordering>,
    ) -> VmResult<()> {
        let len = len.min(self.length());

        // Detach the prefix so a comparator that mutates the array
        // cannot corrupt the sort.
        let mut defined = Vec::new();
        let mut undefined_count = 0u32;
        match self {
            Self::Simple(s) => {
                for i in 0..len {
                    let pos = s.map(i);
                    let v = std::mem::replace(&mut s.values[pos], Value::empty());
                    if let Some(vec) = &mut s.attrs {
                        vec[pos] = PropertyAttributes::default_data();
                    }
                    if v.is_empty() {
                        continue;
                    }
                    if v.is_undefined() {
                        undefined_count += 1;
                    } else {
                        defined.push(v);
                    }
                }
            }
            Self::Sparse(s) => {
                let keys: Vec<u32> = s.tree.range(..len).map(|(&k, _)| k).collect();
                for key in keys {
                    if let Some(slot) = s.tree.remove(&key) {
                        let v = s.slots[slot].clone();
                        s.release_slot(slot);
                        if v.is_undefined() {
                            undefined_count += 1;
                        } else {
                            defined.push(v);
                        }
                    }
                }
            }
        }

        quicksort(&mut defined, compare)?;

        let defined_count = defined.len() as u32;
        for (i, v) in defined.into_iter().enumerate() {
            self.put(i as u32, v);
        }
        let mut next = defined_count;
        for _ in 0..undefined_count {
            self.put(next, Value::undefined());
            next += 1;
        }
        Ok(())
    }

    /// Report every held managed reference to a mark pass
    pub fn trace(&self, tracer: &mut dyn FnMut(*const marten_vm_gc::GcHeader)) {
        match self {
            Self::Simple(s) => {
                for v in &s.values {
                    v.trace(tracer);
                }
            }
            Self::Sparse(s) => {
                for v in &s.slots {
                    v.trace(tracer);
                }
            }
        }
    }
}

impl Default for ArrayData {
    fn default() -> Self {
        Self::new()
    }
}

/// Three-way quicksort with a median-of-three pivot and a fallible
/// comparator. Equal runs collapse into the middle partition, so
/// comparator-equal elements cost nothing extra.
fn quicksort(
    v: &mut [Value],
    compare: &mut dyn FnMut(&Value, &Value) -> VmResult<Ordering>,
) -> VmResult<()> {
    if v.len() <= 8 {
        return insertion_sort(v, compare);
    }

    let mid = v.len() / 2;
    let last = v.len() - 1;
    if compare(&v[mid], &v[0])? == Ordering::Less {
        v.swap(mid, 0);
    }
    if compare(&v[last], &v[0])? == Ordering::Less {
        v.swap(last, 0);
    }
    if compare(&v[last], &v[mid])? == Ordering::Less {
        v.swap(last, mid);
    }
    let pivot = v[mid].clone();

    let mut lt = 0;
    let mut i = 0;
    let mut gt = v.len();
    while i < gt {
        match compare(&v[i], &pivot)? {
            Ordering::Less => {
                v.swap(lt, i);
                lt += 1;
                i += 1;
            }
            Ordering::Greater => {
                gt -= 1;
                v.swap(i, gt);
            }
            Ordering::Equal => i += 1,
        }
    }
    quicksort(&mut v[..lt], compare)?;
    quicksort(&mut v[gt..], compare)
}

fn insertion_sort(
    v: &mut [Value],
    compare: &mut dyn FnMut(&Value, &Value) -> VmResult<Ordering>,
) -> VmResult<()> {
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && compare(&v[j], &v[j - 1])? == Ordering::Less {
            v.swap(j, j - 1);
            j -= 1;
        }
    }
    Ok(())
}
