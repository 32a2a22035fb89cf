//! Observable Cells
//!
//! A cell is the entry point into observable state. It owns a root record
//! with a single `value` field, so that replacing the whole value is an
//! ordinary tracked write on that field.
//!
//! # How Cells Work
//!
//! 1. Reading [`Cell::get`] inside an observer registers the observer on
//!    the root's `value` key, and hands back a wrapper if the value is a
//!    container.
//!
//! 2. [`Cell::set`] writes the `value` field. Observers of the root are
//!    queued unless the new value is identical to the old one.
//!
//! 3. Everything reached through the returned wrapper is tracked key by
//!    key, so an observer that read `value.user.name` re-runs when either
//!    the name, the user or the whole value is replaced.
//!
//! # Example
//!
//! ```rust
//! use observable_core::Runtime;
//!
//! let rt = Runtime::new();
//! let count = rt.observable(1).unwrap();
//! let doubled = {
//!     let count = count.clone();
//!     rt.derived(move || count.get().as_i64().unwrap_or(0) * 2).unwrap()
//! };
//!
//! count.set(5);
//! rt.settle().unwrap();
//! assert_eq!(doubled.get().as_i64(), Some(10));
//! ```

use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::RuntimeInner;
use super::wrapper::{Observed, Reactive, WrapperNode};
use crate::value::{ContainerId, Key, Value};

/// An observable cell. Clones refer to the same cell.
#[derive(Clone, PartialEq)]
pub struct Cell {
    root: Reactive,
}

impl Cell {
    pub(crate) fn new(root: Reactive) -> Self {
        Self { root }
    }

    /// Identity of the cell's root record.
    pub fn id(&self) -> ContainerId {
        self.root.id()
    }

    /// Tracked read of the cell's value.
    pub fn get(&self) -> Observed {
        self.root.get(Key::root()).unwrap_or_default()
    }

    /// Read the value without registering anything.
    pub fn get_untracked(&self) -> Observed {
        self.root.get_untracked(Key::root()).unwrap_or_default()
    }

    /// Replace the cell's value.
    pub fn set(&self, value: impl Into<Value>) {
        self.root
            .set(Key::root(), value)
            .expect("cell root is a record");
    }

    /// Replace the value with `f` applied to the current one. The current
    /// value is read untracked.
    pub fn update<V: Into<Value>>(&self, f: impl FnOnce(Observed) -> V) {
        let next = f(self.get_untracked());
        self.set(next);
    }

    /// The wrapper over the cell's root record.
    pub fn reactive(&self) -> &Reactive {
        &self.root
    }

    /// Untracked deep snapshot of the value.
    pub fn snapshot(&self) -> serde_json::Value {
        self.get_untracked().to_json()
    }

    /// A reference that does not keep the cell alive.
    pub fn downgrade(&self) -> WeakCell {
        WeakCell {
            node: Rc::downgrade(self.root.node()),
            runtime: self.root.runtime_ref().clone(),
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("value", &self.snapshot())
            .finish()
    }
}

/// Weak counterpart of [`Cell`].
#[derive(Clone)]
pub struct WeakCell {
    node: Weak<WrapperNode>,
    runtime: Weak<RuntimeInner>,
}

impl WeakCell {
    pub fn upgrade(&self) -> Option<Cell> {
        let node = self.node.upgrade()?;
        Some(Cell::new(Reactive::new(node, self.runtime.clone())))
    }
}

impl fmt::Debug for WeakCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCell")
            .field("alive", &(self.node.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::reactive::Runtime;
    use crate::value::Value;

    #[test]
    fn cell_exposes_its_value() {
        let rt = Runtime::new();
        let cell = rt.observable(Value::from(json!({ "a": [1, 2] }))).unwrap();

        let value = cell.get();
        let items = value.get("a").unwrap();
        assert_eq!(items.reactive().unwrap().len(), 2);
        assert_eq!(cell.snapshot(), json!({ "a": [1, 2] }));
    }

    #[test]
    fn update_applies_to_current_value() {
        let rt = Runtime::new();
        let cell = rt.observable(2).unwrap();
        cell.update(|n| n.as_i64().unwrap_or(0) + 3);
        assert_eq!(cell.get().as_i64(), Some(5));
    }

    #[test]
    fn weak_cell_does_not_keep_the_cell_alive() {
        let rt = Runtime::new();
        let cell = rt.observable("x").unwrap();
        let weak = cell.downgrade();
        assert_eq!(weak.upgrade(), Some(cell.clone()));
        drop(cell);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn cells_outlive_their_runtime_as_plain_state() {
        let rt = Runtime::new();
        let cell = rt.observable(1).unwrap();
        drop(rt);
        cell.set(2);
        assert_eq!(cell.get().as_i64(), Some(2));
        assert!(cell.reactive().runtime().is_none());
    }
}
