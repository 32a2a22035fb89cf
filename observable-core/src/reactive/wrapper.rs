//! Interception Layer
//!
//! [`Reactive`] is the wrapper handed out for every container reachable
//! from an observable cell. All access goes through three traps:
//!
//! - **read** registers the active observer (if any) against the key, and
//!   wraps container-valued results, memoizing the child wrapper so repeated
//!   reads return the same instance;
//! - **write** assigns first, then notifies the key's observers unless the
//!   new value is identical to the old one;
//! - **delete** notifies like a write if the key existed, then drops the
//!   key's registrations.
//!
//! Every key on a traversed path is registered, not only the last one. An
//! observer that read `cell.value.a` is therefore also registered on the
//! cell's `value` key, and replacing the whole value re-runs it.
//!
//! # Collections
//!
//! Maps and sets are tracked coarsely: any read registers their synthetic
//! [`Key::Contents`], and every call of their mutation API (`insert`,
//! `add`, `remove`, `clear`) is a write on `Contents` that always notifies.
//! Reading a map or set out of its parent also registers `Contents`, so
//! observers that merely reached the collection see its mutations.
//!
//! # Ownership
//!
//! Child wrappers are memoized weakly. A wrapper lives as long as someone
//! holds it, so state whose containers point back at their ancestors does
//! not keep its wrappers alive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::log::MutationKind;
use super::runtime::{Runtime, RuntimeInner};
use crate::error::{Error, Result};
use crate::value::{Container, ContainerId, EntryKey, Key, KeyPath, Shape, Value};

/// Runtime-side state of one wrapper: the container, where it was first
/// reached from, and the child wrappers memoized per key.
pub(crate) struct WrapperNode {
    pub container: Container,
    pub path: KeyPath,
    /// Root container of the cell this wrapper was first reached through.
    pub cell: ContainerId,
    children: RefCell<HashMap<Key, Weak<WrapperNode>>>,
}

impl WrapperNode {
    /// A wrapper that is its own cell root.
    pub fn detached(container: Container) -> Rc<Self> {
        Rc::new(Self {
            cell: container.id(),
            container,
            path: KeyPath::new(),
            children: RefCell::new(HashMap::new()),
        })
    }

    /// A wrapper for `container`, found at `key` below this one.
    pub fn child(&self, key: &Key, container: Container) -> Self {
        let mut path = self.path.clone();
        path.push(key.clone());
        Self {
            container,
            path,
            cell: self.cell,
            children: RefCell::new(HashMap::new()),
        }
    }

    fn memoized(&self, key: &Key, container: &Container) -> Option<Rc<WrapperNode>> {
        self.children
            .borrow()
            .get(key)
            .and_then(Weak::upgrade)
            .filter(|node| node.container.ptr_eq(container))
    }

    fn forget_children(&self, keys: &[Key]) {
        let mut children = self.children.borrow_mut();
        for key in keys {
            children.remove(key);
        }
    }
}

/// Reactive wrapper over one raw container.
///
/// Cloning is cheap and yields the same wrapper; [`ptr_eq`](Self::ptr_eq)
/// compares wrapper identity.
#[derive(Clone)]
pub struct Reactive {
    node: Rc<WrapperNode>,
    runtime: Weak<RuntimeInner>,
}

/// Result of a tracked read: a scalar, or a wrapper for a container.
#[derive(Debug, Clone)]
pub enum Observed {
    Value(Value),
    Reactive(Reactive),
}

fn structure_key(shape: Shape) -> Key {
    match shape {
        Shape::Sequence => Key::Length,
        _ => Key::Contents,
    }
}

fn is_collection(shape: Shape) -> bool {
    matches!(shape, Shape::Map | Shape::Set)
}

impl Reactive {
    pub(crate) fn new(node: Rc<WrapperNode>, runtime: Weak<RuntimeInner>) -> Self {
        Self { node, runtime }
    }

    pub(crate) fn node(&self) -> &Rc<WrapperNode> {
        &self.node
    }

    pub(crate) fn runtime_ref(&self) -> &Weak<RuntimeInner> {
        &self.runtime
    }

    /// Identity of the wrapped container.
    pub fn id(&self) -> ContainerId {
        self.node.container.id()
    }

    pub fn shape(&self) -> Shape {
        self.node.container.shape()
    }

    /// Keys from the owning cell's root field down to this container.
    pub fn path(&self) -> &KeyPath {
        &self.node.path
    }

    /// The wrapped raw container. Access through it is not tracked.
    pub fn raw(&self) -> &Container {
        &self.node.container
    }

    /// The runtime this wrapper reports to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade().map(Runtime::from_inner)
    }

    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Tracked read of `key`.
    pub fn get(&self, key: impl Into<Key>) -> Result<Observed> {
        self.read_slot(&key.into(), true)
    }

    /// Read of `key` that registers nothing.
    pub fn get_untracked(&self, key: impl Into<Key>) -> Result<Observed> {
        self.read_slot(&key.into(), false)
    }

    /// Tracked existence check.
    pub fn has(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        let present = self.node.container.data().as_interceptable().contains(&key)?;
        self.track(&key);
        Ok(present)
    }

    /// Write `value` at `key`, notifying observers of `key` if the stored
    /// value changed.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.write_slot(key.into(), value.into())
    }

    /// Delete `key`. Returns whether it existed.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        self.delete_slot(key.into())
    }

    /// Tracked number of slots.
    pub fn len(&self) -> usize {
        self.track(&structure_key(self.shape()));
        self.node.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked list of keys.
    pub fn keys(&self) -> Vec<Key> {
        self.track(&structure_key(self.shape()));
        self.node.container.data().as_interceptable().keys()
    }

    /// Tracked read of every slot, in order. Set members are returned as
    /// scalar values.
    pub fn values(&self) -> Result<Vec<Observed>> {
        if let Some(members) = self.set_members() {
            self.track(&Key::Contents);
            return Ok(members
                .into_iter()
                .map(|member| Observed::Value(entry_key_value(member)))
                .collect());
        }
        self.keys()
            .iter()
            .map(|key| self.read_slot(key, true))
            .collect()
    }

    /// Append to a sequence.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.expect_shape(Shape::Sequence)?;
        let len = self.node.container.len();
        self.write_slot(Key::Index(len), value.into())?;
        self.write_slot(Key::Length, Value::Int(len as i64 + 1))
    }

    /// Remove and return the last element of a sequence, `Undefined` when
    /// it is empty.
    pub fn pop(&self) -> Result<Value> {
        self.expect_shape(Shape::Sequence)?;
        let len = self.node.container.len();
        if len == 0 {
            return Ok(Value::Undefined);
        }
        let last = Key::Index(len - 1);
        let value = self.node.container.read(&last)?.unwrap_or_default();
        self.delete_slot(last)?;
        self.write_slot(Key::Length, Value::Int(len as i64 - 1))?;
        Ok(value)
    }

    /// Tracked lookup in a map.
    pub fn entry(&self, key: impl Into<EntryKey>) -> Result<Observed> {
        self.expect_shape(Shape::Map)?;
        self.read_slot(&Key::Entry(key.into()), true)
    }

    /// Tracked membership test on a map or set.
    pub fn contains(&self, key: impl Into<EntryKey>) -> Result<bool> {
        self.expect_collection()?;
        self.has(Key::Entry(key.into()))
    }

    /// Insert into a map. Always notifies the map's observers.
    pub fn insert(&self, key: impl Into<EntryKey>, value: impl Into<Value>) -> Result<()> {
        self.expect_shape(Shape::Map)?;
        self.write_slot(Key::Entry(key.into()), value.into())
    }

    /// Add a member to a set. Always notifies the set's observers.
    pub fn add(&self, key: impl Into<EntryKey>) -> Result<()> {
        self.expect_shape(Shape::Set)?;
        self.write_slot(Key::Entry(key.into()), Value::Bool(true))
    }

    /// Remove a map entry or set member. Always notifies; returns whether
    /// the key was present.
    pub fn remove(&self, key: impl Into<EntryKey>) -> Result<bool> {
        self.expect_collection()?;
        self.delete_slot(Key::Entry(key.into()))
    }

    /// Empty a map or set. Always notifies.
    pub fn clear(&self) -> Result<()> {
        self.expect_collection()?;
        self.write_slot(Key::Contents, Value::Undefined)
    }

    /// Tracked list of map keys or set members.
    pub fn entry_keys(&self) -> Result<Vec<EntryKey>> {
        self.expect_collection()?;
        Ok(self
            .keys()
            .into_iter()
            .filter_map(|key| match key {
                Key::Entry(k) => Some(k),
                _ => None,
            })
            .collect())
    }

    /// Untracked deep snapshot of the wrapped container.
    pub fn snapshot(&self) -> serde_json::Value {
        self.node.container.to_json()
    }

    fn track(&self, key: &Key) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        if is_collection(self.shape()) {
            runtime.track(&self.node.container, &Key::Contents);
        } else {
            runtime.track(&self.node.container, key);
        }
    }

    fn read_slot(&self, key: &Key, tracked: bool) -> Result<Observed> {
        let raw = self.node.container.read(key)?;
        if tracked {
            self.track(key);
        }

        match raw {
            Some(Value::Container(child)) => {
                let node = self.child_node(key, child);
                let child = Reactive::new(node, self.runtime.clone());
                if tracked && is_collection(child.shape()) {
                    child.track(&Key::Contents);
                }
                Ok(Observed::Reactive(child))
            }
            Some(value) => Ok(Observed::Value(value)),
            None => Ok(Observed::Value(Value::Undefined)),
        }
    }

    fn child_node(&self, key: &Key, child: Container) -> Rc<WrapperNode> {
        if let Some(node) = self.node.memoized(key, &child) {
            return node;
        }
        let node = match self.runtime.upgrade() {
            Some(runtime) => runtime.wrap(&self.node, key, child),
            None => Rc::new(self.node.child(key, child)),
        };
        self.node
            .children
            .borrow_mut()
            .insert(key.clone(), Rc::downgrade(&node));
        node
    }

    fn write_slot(&self, key: Key, value: Value) -> Result<()> {
        let (shape, bookkeeping, old, new) = {
            let mut data = self.node.container.data_mut();
            let slot = data.as_interceptable_mut();
            let bookkeeping = slot.is_bookkeeping(&key);
            let old = slot.write(&key, value)?;
            let new = slot.read(&key)?;
            (slot.shape(), bookkeeping, old, new)
        };

        let existed = old.is_some();
        let old = old.unwrap_or_default();
        let changed = !old.is_identical(&new.unwrap_or_default());
        if !(changed || bookkeeping || is_collection(shape)) {
            return Ok(());
        }

        // Structural side effects of the write.
        let mut also = Vec::new();
        match (&key, shape) {
            (Key::Contents, _) => self.node.children.borrow_mut().clear(),
            (Key::Field(_), Shape::Record) if !existed => also.push(Key::Contents),
            (Key::Index(_), Shape::Sequence) if !existed => also.push(Key::Length),
            (Key::Length, Shape::Sequence) => {
                let new_len = self.node.container.len();
                let old_len = old.as_i64().and_then(|n| usize::try_from(n).ok());
                also.extend((new_len..old_len.unwrap_or(new_len)).map(Key::Index));
                self.node.forget_children(&also);
            }
            _ => {}
        }
        self.node.forget_children(std::slice::from_ref(&key));

        if let Some(runtime) = self.runtime.upgrade() {
            let notified = if is_collection(shape) { Key::Contents } else { key };
            runtime.notify(&self.node, &notified, MutationKind::Set, &also);
        }
        Ok(())
    }

    fn delete_slot(&self, key: Key) -> Result<bool> {
        let (shape, removed) = {
            let mut data = self.node.container.data_mut();
            let slot = data.as_interceptable_mut();
            let removed = slot.delete(&key)?;
            (slot.shape(), removed)
        };

        let existed = removed.is_some();
        if !existed && !is_collection(shape) {
            return Ok(false);
        }
        self.node.forget_children(std::slice::from_ref(&key));

        if let Some(runtime) = self.runtime.upgrade() {
            if is_collection(shape) {
                runtime.notify(&self.node, &Key::Contents, MutationKind::Set, &[]);
            } else {
                let also = if shape == Shape::Record {
                    vec![Key::Contents]
                } else {
                    Vec::new()
                };
                runtime.notify(&self.node, &key, MutationKind::Delete, &also);
            }
        }
        Ok(existed)
    }

    fn set_members(&self) -> Option<Vec<EntryKey>> {
        match &*self.node.container.data() {
            crate::value::ContainerData::Set(set) => Some(set.0.iter().cloned().collect()),
            _ => None,
        }
    }

    fn expect_shape(&self, expected: Shape) -> Result<()> {
        let found = self.shape();
        if found == expected {
            Ok(())
        } else {
            Err(Error::ShapeMismatch { expected, found })
        }
    }

    fn expect_collection(&self) -> Result<()> {
        match self.shape() {
            Shape::Map | Shape::Set => Ok(()),
            found => Err(Error::ShapeMismatch {
                expected: Shape::Map,
                found,
            }),
        }
    }
}

fn entry_key_value(key: EntryKey) -> Value {
    match key {
        EntryKey::Bool(b) => Value::Bool(b),
        EntryKey::Int(i) => Value::Int(i),
        EntryKey::Str(s) => Value::Str(s),
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.id())
            .field("path", &self.node.path)
            .field("container", &self.node.container)
            .finish()
    }
}

impl Default for Observed {
    fn default() -> Self {
        Observed::Value(Value::Undefined)
    }
}

impl PartialEq for Observed {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Observed::Value(a), Observed::Value(b)) => a.is_identical(b),
            (Observed::Reactive(a), Observed::Reactive(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Observed {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Observed::Value(v) => Some(v),
            Observed::Reactive(_) => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Observed::Reactive(r) => Some(r),
            Observed::Value(_) => None,
        }
    }

    /// The wrapper, or [`Error::NotAContainer`] for a scalar.
    pub fn reactive(&self) -> Result<&Reactive> {
        self.as_reactive().ok_or(Error::NotAContainer)
    }

    /// Tracked read of `key` on the wrapped container.
    pub fn get(&self, key: impl Into<Key>) -> Result<Observed> {
        self.reactive()?.get(key)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Observed::Value(Value::Undefined))
    }

    /// Unwrap to a raw value; wrappers yield their raw container.
    pub fn into_value(self) -> Value {
        match self {
            Observed::Value(v) => v,
            Observed::Reactive(r) => Value::Container(r.node.container.clone()),
        }
    }

    /// Untracked deep snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Observed::Value(v) => v.to_json(),
            Observed::Reactive(r) => r.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached(value: Value) -> Reactive {
        let container = match value {
            Value::Container(c) => c,
            _ => unreachable!("test helper takes containers"),
        };
        Reactive::new(WrapperNode::detached(container), Weak::new())
    }

    #[test]
    fn detached_wrapper_reads_and_writes_raw_state() {
        let record = detached(Value::record([("a", 1)]));
        assert_eq!(record.get("a").unwrap().as_i64(), Some(1));
        record.set("b", 2).unwrap();
        assert_eq!(record.snapshot(), json!({ "a": 1, "b": 2 }));
        assert!(record.delete("a").unwrap());
        assert!(!record.delete("a").unwrap());
    }

    #[test]
    fn child_wrappers_are_memoized_per_key() {
        let root = detached(Value::from(json!({ "nested": { "x": 1 } })));
        let first = root.get("nested").unwrap();
        let second = root.get("nested").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.reactive().unwrap().path().as_slice(), &[Key::field("nested")]);

        root.set("nested", Value::record([("x", 2)])).unwrap();
        let third = root.get("nested").unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn parent_does_not_keep_child_wrappers_alive() {
        let root = detached(Value::from(json!({ "nested": { "x": 1 } })));
        let child = root.get("nested").unwrap();
        let weak = Rc::downgrade(child.reactive().unwrap().node());
        drop(child);
        assert!(weak.upgrade().is_none());
        assert_eq!(root.get("nested").unwrap().get("x").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn wrappers_over_a_record_pointing_at_itself_are_released() {
        let container = Container::record([("x", 1)]);
        let root = Reactive::new(WrapperNode::detached(container.clone()), Weak::new());
        root.set("back", Value::Container(container.clone())).unwrap();

        let child = root.get("back").unwrap();
        let grandchild = child.get("back").unwrap();
        assert_eq!(grandchild.get("x").unwrap().as_i64(), Some(1));

        let weak = Rc::downgrade(child.reactive().unwrap().node());
        drop(grandchild);
        drop(child);
        assert!(weak.upgrade().is_none());

        // break the raw cycle so the record itself is freed
        assert!(root.delete("back").unwrap());
    }

    #[test]
    fn sequence_push_and_pop() {
        let seq = detached(Value::sequence([1, 2]));
        seq.push(3).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.pop().unwrap(), Value::Int(3));
        assert_eq!(seq.snapshot(), json!([1, 2]));
        seq.pop().unwrap();
        seq.pop().unwrap();
        assert!(seq.pop().unwrap().is_undefined());
    }

    #[test]
    fn collection_api_is_shape_checked() {
        let record = detached(Value::record([("a", 1)]));
        assert_eq!(
            record.push(1).unwrap_err(),
            Error::ShapeMismatch {
                expected: Shape::Sequence,
                found: Shape::Record
            }
        );
        assert!(matches!(record.clear(), Err(Error::ShapeMismatch { .. })));

        let set = detached(Value::set(["a"]));
        assert!(matches!(set.insert("b", 1), Err(Error::ShapeMismatch { .. })));
        set.add("b").unwrap();
        assert!(set.contains("b").unwrap());
        assert_eq!(set.entry_keys().unwrap(), vec![EntryKey::from("a"), EntryKey::from("b")]);
    }

    #[test]
    fn map_entries_wrap_nested_containers() {
        let map = detached(Value::map([("k", Value::sequence([1]))]));
        let entry = map.entry("k").unwrap();
        assert_eq!(entry.reactive().unwrap().shape(), Shape::Sequence);
        assert!(map.remove("k").unwrap());
        assert!(map.entry("k").unwrap().is_undefined());
    }

    #[test]
    fn scalar_reads_are_not_containers() {
        let record = detached(Value::record([("a", 1)]));
        let a = record.get("a").unwrap();
        assert_eq!(a.get("b").unwrap_err(), Error::NotAContainer);
        assert!(record.get("missing").unwrap().is_undefined());
    }
}
