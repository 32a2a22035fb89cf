//! Value Model
//!
//! Observable state is a tree (or graph) of dynamically shaped values:
//! scalars plus four container shapes. Containers have reference identity,
//! which is what the wrapper cache and the access-path registry key on.
//!
//! # Equality
//!
//! Writes are skipped as notifications when the new value is *identical*
//! to the old one. Scalars are identical when equal, strings when their
//! contents match, and containers only when they are the same allocation.
//! Numbers compare by numeric value across `Int` and `Float`, so `3` and
//! `3.0` are identical, while `NaN` is never identical to itself.

mod container;
mod json;

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

pub use container::{
    Container, ContainerData, ContainerId, Interceptable, MapEntries, Record, Sequence,
    SetMembers, WeakContainer,
};

/// Name of the single field every observable cell exposes.
pub const ROOT_FIELD: &str = "value";

/// Ordered keys from a cell's root field down to a mutated key.
pub type KeyPath = SmallVec<[Key; 4]>;

/// A dynamically typed value held by an observable cell.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value (an unset derived cell, a sequence hole).
    #[default]
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A raw container, compared by identity.
    Container(Container),
}

impl Value {
    /// Build a record from `(field, value)` pairs.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Value::Container(Container::record(fields))
    }

    /// Build a sequence.
    pub fn sequence<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::Container(Container::sequence(items))
    }

    /// Build a map from `(key, value)` entries.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<EntryKey>,
        V: Into<Value>,
    {
        Value::Container(Container::map(entries))
    }

    /// Build a set.
    pub fn set<K: Into<EntryKey>>(members: impl IntoIterator<Item = K>) -> Self {
        Value::Container(Container::set(members))
    }

    /// Strict identity as used by the write trap.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Container(a), Value::Container(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Container(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_identical(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Container(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Undefined)
    }
}

/// Scalar key of a map entry or set member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum EntryKey {
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Bool(b) => write!(f, "{b}"),
            EntryKey::Int(i) => write!(f, "{i}"),
            EntryKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for EntryKey {
    fn from(v: bool) -> Self {
        EntryKey::Bool(v)
    }
}

impl From<i64> for EntryKey {
    fn from(v: i64) -> Self {
        EntryKey::Int(v)
    }
}

impl From<i32> for EntryKey {
    fn from(v: i32) -> Self {
        EntryKey::Int(v.into())
    }
}

impl From<&str> for EntryKey {
    fn from(v: &str) -> Self {
        EntryKey::Str(v.into())
    }
}

impl From<String> for EntryKey {
    fn from(v: String) -> Self {
        EntryKey::Str(v.into())
    }
}

/// Address of one slot inside a container.
///
/// `Length` and `Contents` are bookkeeping keys: they describe the
/// container's structure rather than a stored value, and writes to them
/// always notify.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named record field.
    Field(Arc<str>),
    /// A sequence position.
    Index(usize),
    /// A map entry or set member.
    Entry(EntryKey),
    /// Length of a sequence.
    Length,
    /// Synthetic key standing for a container's whole contents: the key set
    /// of a record, every entry of a map or set.
    Contents,
}

impl Key {
    pub fn field(name: impl Into<Arc<str>>) -> Self {
        Key::Field(name.into())
    }

    /// The key of a cell's root field.
    pub fn root() -> Self {
        Key::Field(ROOT_FIELD.into())
    }

    pub fn is_bookkeeping(&self) -> bool {
        matches!(self, Key::Length | Key::Contents)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, ".{name}"),
            Key::Index(i) => write!(f, "[{i}]"),
            Key::Entry(k) => write!(f, "[{k}]"),
            Key::Length => f.write_str(".length"),
            Key::Contents => f.write_str(".$"),
        }
    }
}

/// Keys serialize as plain path segments: field names and `"length"` /
/// `"$"` as strings, indices as numbers, entry keys as themselves.
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Field(name) => serializer.serialize_str(name),
            Key::Index(i) => serializer.serialize_u64(*i as u64),
            Key::Entry(k) => k.serialize(serializer),
            Key::Length => serializer.serialize_str("length"),
            Key::Contents => serializer.serialize_str("$"),
        }
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Field(v.into())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Field(v.into())
    }
}

impl From<usize> for Key {
    fn from(v: usize) -> Self {
        Key::Index(v)
    }
}

impl From<EntryKey> for Key {
    fn from(v: EntryKey) -> Self {
        Key::Entry(v)
    }
}

/// The four container shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Record,
    Sequence,
    Map,
    Set,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::Record => "record",
            Shape::Sequence => "sequence",
            Shape::Map => "map",
            Shape::Set => "set",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_identical_by_value() {
        assert!(Value::from(3).is_identical(&Value::Int(3)));
        assert!(Value::from("a").is_identical(&Value::from(String::from("a"))));
        assert!(Value::from(3).is_identical(&Value::Float(3.0)));
        assert!(Value::Float(3.0).is_identical(&Value::Int(3)));
        assert!(!Value::from(3).is_identical(&Value::Float(3.5)));
        assert!(Value::Undefined.is_identical(&Value::default()));
    }

    #[test]
    fn nan_is_never_identical() {
        let nan = Value::Float(f64::NAN);
        assert!(!nan.is_identical(&nan.clone()));
    }

    #[test]
    fn containers_are_identical_by_allocation() {
        let a = Value::record([("x", 1)]);
        let b = Value::record([("x", 1)]);
        assert!(a.is_identical(&a.clone()));
        assert!(!a.is_identical(&b));
    }

    #[test]
    fn keys_serialize_as_path_segments() {
        let path: KeyPath = smallvec::smallvec![
            Key::root(),
            Key::field("items"),
            Key::Index(2),
            Key::Length,
            Key::Contents,
            Key::Entry(EntryKey::Int(7)),
        ];
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["value","items",2,"length","$",7]"#);
    }

    #[test]
    fn only_structural_keys_are_bookkeeping() {
        assert!(Key::Length.is_bookkeeping());
        assert!(Key::Contents.is_bookkeeping());
        assert!(!Key::field("length").is_bookkeeping());
        assert!(!Key::Index(0).is_bookkeeping());
    }
}
