//! Raw containers and the per-shape interception capability.
//!
//! A [`Container`] is a shared, interior-mutable allocation holding one of
//! the four shapes. Its [`ContainerId`] is the identity the engine keys its
//! bookkeeping on; [`WeakContainer`] lets that bookkeeping notice when the
//! container has been abandoned.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::{EntryKey, Key, Shape, Value};
use crate::error::{Error, Result};

/// Process-unique identity of a raw container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read/write/delete capability implemented by every container shape.
///
/// `read` and `delete` return `Ok(None)` for absent keys; `write` returns
/// the previous value, `None` when the slot did not exist. Keys that cannot
/// address the shape are rejected with [`Error::InvalidKey`].
pub trait Interceptable {
    fn shape(&self) -> Shape;

    fn read(&self, key: &Key) -> Result<Option<Value>>;

    fn write(&mut self, key: &Key, value: Value) -> Result<Option<Value>>;

    fn delete(&mut self, key: &Key) -> Result<Option<Value>>;

    /// Number of stored slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every stored slot, in order.
    fn keys(&self) -> Vec<Key>;

    /// Whether `key` is part of the shape's native structural bookkeeping.
    fn is_bookkeeping(&self, key: &Key) -> bool {
        key.is_bookkeeping()
    }

    fn contains(&self, key: &Key) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }

    fn invalid(&self, key: &Key) -> Error {
        Error::InvalidKey {
            key: key.clone(),
            shape: self.shape(),
        }
    }
}

/// Ordered string-keyed fields.
#[derive(Debug, Clone, Default)]
pub struct Record(pub IndexMap<Arc<str>, Value>);

impl Interceptable for Record {
    fn shape(&self) -> Shape {
        Shape::Record
    }

    fn read(&self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Field(name) => Ok(self.0.get(name).cloned()),
            Key::Contents => Ok(Some(Value::Int(self.0.len() as i64))),
            _ => Err(self.invalid(key)),
        }
    }

    fn write(&mut self, key: &Key, value: Value) -> Result<Option<Value>> {
        match key {
            Key::Field(name) => Ok(self.0.insert(name.clone(), value)),
            _ => Err(self.invalid(key)),
        }
    }

    fn delete(&mut self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Field(name) => Ok(self.0.shift_remove(name)),
            _ => Err(self.invalid(key)),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.0.keys().cloned().map(Key::Field).collect()
    }
}

/// A growable sequence. Deleting an element leaves an `Undefined` hole;
/// writing `Length` truncates or pads with holes.
#[derive(Debug, Clone, Default)]
pub struct Sequence(pub Vec<Value>);

impl Interceptable for Sequence {
    fn shape(&self) -> Shape {
        Shape::Sequence
    }

    fn read(&self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Index(i) => Ok(self.0.get(*i).cloned()),
            Key::Length => Ok(Some(Value::Int(self.0.len() as i64))),
            _ => Err(self.invalid(key)),
        }
    }

    fn write(&mut self, key: &Key, value: Value) -> Result<Option<Value>> {
        match key {
            Key::Index(i) if *i < self.0.len() => {
                Ok(Some(std::mem::replace(&mut self.0[*i], value)))
            }
            Key::Index(i) if *i == self.0.len() => {
                self.0.push(value);
                Ok(None)
            }
            Key::Index(i) => Err(Error::IndexOutOfBounds {
                index: *i,
                len: self.0.len(),
            }),
            Key::Length => {
                let old = self.0.len();
                let new = value
                    .as_i64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| self.invalid(key))?;
                self.0.resize(new, Value::Undefined);
                Ok(Some(Value::Int(old as i64)))
            }
            _ => Err(self.invalid(key)),
        }
    }

    fn delete(&mut self, key: &Key) -> Result<Option<Value>> {
        match key {
            // a hole left by an earlier delete counts as absent
            Key::Index(i) => Ok(self
                .0
                .get_mut(*i)
                .filter(|slot| !slot.is_undefined())
                .map(std::mem::take)),
            _ => Err(self.invalid(key)),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn keys(&self) -> Vec<Key> {
        (0..self.0.len()).map(Key::Index).collect()
    }
}

/// Ordered map entries keyed by scalars.
#[derive(Debug, Clone, Default)]
pub struct MapEntries(pub IndexMap<EntryKey, Value>);

impl Interceptable for MapEntries {
    fn shape(&self) -> Shape {
        Shape::Map
    }

    fn read(&self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => Ok(self.0.get(k).cloned()),
            Key::Contents => Ok(Some(Value::Int(self.0.len() as i64))),
            _ => Err(self.invalid(key)),
        }
    }

    fn write(&mut self, key: &Key, value: Value) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => Ok(self.0.insert(k.clone(), value)),
            Key::Contents if value.is_undefined() => {
                self.0.clear();
                Ok(None)
            }
            _ => Err(self.invalid(key)),
        }
    }

    fn delete(&mut self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => Ok(self.0.shift_remove(k)),
            _ => Err(self.invalid(key)),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.0.keys().cloned().map(Key::Entry).collect()
    }
}

/// Ordered set members. A present member reads as `Bool(true)`.
#[derive(Debug, Clone, Default)]
pub struct SetMembers(pub IndexSet<EntryKey>);

impl Interceptable for SetMembers {
    fn shape(&self) -> Shape {
        Shape::Set
    }

    fn read(&self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => Ok(self.0.contains(k).then_some(Value::Bool(true))),
            Key::Contents => Ok(Some(Value::Int(self.0.len() as i64))),
            _ => Err(self.invalid(key)),
        }
    }

    fn write(&mut self, key: &Key, value: Value) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => {
                let existed = !self.0.insert(k.clone());
                Ok(existed.then_some(Value::Bool(true)))
            }
            Key::Contents if value.is_undefined() => {
                self.0.clear();
                Ok(None)
            }
            _ => Err(self.invalid(key)),
        }
    }

    fn delete(&mut self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::Entry(k) => Ok(self.0.shift_remove(k).then_some(Value::Bool(true))),
            _ => Err(self.invalid(key)),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.0.iter().cloned().map(Key::Entry).collect()
    }
}

/// Storage of a raw container.
#[derive(Debug, Clone)]
pub enum ContainerData {
    Record(Record),
    Sequence(Sequence),
    Map(MapEntries),
    Set(SetMembers),
}

impl ContainerData {
    pub fn as_interceptable(&self) -> &dyn Interceptable {
        match self {
            ContainerData::Record(r) => r,
            ContainerData::Sequence(s) => s,
            ContainerData::Map(m) => m,
            ContainerData::Set(s) => s,
        }
    }

    pub fn as_interceptable_mut(&mut self) -> &mut dyn Interceptable {
        match self {
            ContainerData::Record(r) => r,
            ContainerData::Sequence(s) => s,
            ContainerData::Map(m) => m,
            ContainerData::Set(s) => s,
        }
    }
}

#[derive(Debug)]
struct ContainerCell {
    id: ContainerId,
    data: RefCell<ContainerData>,
}

/// A raw container with reference identity.
///
/// Cloning a `Container` clones the reference, not the contents.
#[derive(Clone)]
pub struct Container(Rc<ContainerCell>);

impl Container {
    pub fn new(data: ContainerData) -> Self {
        Self(Rc::new(ContainerCell {
            id: ContainerId::new(),
            data: RefCell::new(data),
        }))
    }

    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::new(ContainerData::Record(Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    pub fn sequence<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::new(ContainerData::Sequence(Sequence(
            items.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<EntryKey>,
        V: Into<Value>,
    {
        Self::new(ContainerData::Map(MapEntries(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    pub fn set<K: Into<EntryKey>>(members: impl IntoIterator<Item = K>) -> Self {
        Self::new(ContainerData::Set(SetMembers(
            members.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn id(&self) -> ContainerId {
        self.0.id
    }

    pub fn shape(&self) -> Shape {
        self.0.data.borrow().as_interceptable().shape()
    }

    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(Rc::downgrade(&self.0))
    }

    /// Borrow the raw storage. Reads through this bypass tracking.
    pub fn data(&self) -> Ref<'_, ContainerData> {
        self.0.data.borrow()
    }

    /// Mutably borrow the raw storage. Writes through this bypass
    /// notification entirely.
    pub fn data_mut(&self) -> RefMut<'_, ContainerData> {
        self.0.data.borrow_mut()
    }

    /// Untracked raw read.
    pub fn read(&self, key: &Key) -> Result<Option<Value>> {
        self.data().as_interceptable().read(key)
    }

    pub fn len(&self) -> usize {
        self.data().as_interceptable().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.data.try_borrow() {
            Ok(data) => f
                .debug_struct("Container")
                .field("id", &self.0.id)
                .field("shape", &data.as_interceptable().shape())
                .field("len", &data.as_interceptable().len())
                .finish(),
            Err(_) => f
                .debug_struct("Container")
                .field("id", &self.0.id)
                .finish_non_exhaustive(),
        }
    }
}

/// Non-owning reference to a raw container.
#[derive(Debug, Clone)]
pub struct WeakContainer(Weak<ContainerCell>);

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(Container)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_ids_are_unique() {
        let a = Container::record::<&str, i64>([]);
        let b = Container::record::<&str, i64>([]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn record_write_reports_previous_value() {
        let mut record = Record::default();
        assert_eq!(record.write(&Key::field("a"), Value::Int(1)).unwrap(), None);
        assert_eq!(
            record.write(&Key::field("a"), Value::Int(2)).unwrap(),
            Some(Value::Int(1))
        );
        assert_eq!(record.keys(), vec![Key::field("a")]);
    }

    #[test]
    fn record_rejects_indices() {
        let record = Record::default();
        let err = record.read(&Key::Index(0)).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidKey {
                key: Key::Index(0),
                shape: Shape::Record
            }
        );
    }

    #[test]
    fn sequence_appends_at_len_and_rejects_gaps() {
        let mut seq = Sequence(vec![Value::Int(1)]);
        assert_eq!(seq.write(&Key::Index(1), Value::Int(2)).unwrap(), None);
        assert_eq!(seq.len(), 2);
        let err = seq.write(&Key::Index(5), Value::Int(3)).unwrap_err();
        assert_eq!(err, Error::IndexOutOfBounds { index: 5, len: 2 });
    }

    #[test]
    fn sequence_delete_leaves_hole_and_length_truncates() {
        let mut seq = Sequence(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(seq.delete(&Key::Index(1)).unwrap(), Some(Value::Int(2)));
        assert_eq!(seq.read(&Key::Index(1)).unwrap(), Some(Value::Undefined));
        assert_eq!(seq.delete(&Key::Index(1)).unwrap(), None);
        seq.write(&Key::Length, Value::Int(1)).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.delete(&Key::Index(4)).unwrap(), None);
    }

    #[test]
    fn set_members_read_as_true() {
        let mut set = SetMembers::default();
        let key = Key::Entry(EntryKey::from("x"));
        assert_eq!(set.write(&key, Value::Bool(true)).unwrap(), None);
        assert_eq!(set.read(&key).unwrap(), Some(Value::Bool(true)));
        assert_eq!(set.write(&key, Value::Bool(true)).unwrap(), Some(Value::Bool(true)));
        assert!(set.delete(&key).unwrap().is_some());
        assert!(!set.contains(&key).unwrap());
    }

    #[test]
    fn map_contents_clear() {
        let mut map = MapEntries::default();
        map.write(&Key::Entry(EntryKey::Int(1)), Value::from("one")).unwrap();
        map.write(&Key::Contents, Value::Undefined).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn weak_container_tracks_liveness() {
        let container = Container::sequence([1, 2]);
        let weak = container.downgrade();
        assert!(weak.is_alive());
        drop(container);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
