//! Observers
//!
//! An observer is a callback re-run whenever something it read changes.
//! It runs once immediately when registered through
//! [`Runtime::observe`](super::Runtime::observe); every run rebuilds its
//! set of dependencies from scratch, since a re-run may take a different
//! path through the state.
//!
//! Observers created while another observer is running are *inert*: their
//! callback runs once, inline, and everything it reads is attributed to the
//! outer observer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use super::runtime::RuntimeInner;
use crate::value::{ContainerId, Key, WeakContainer};

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Runtime-side state of a registered observer.
pub(crate) struct ObserverNode {
    pub id: ObserverId,
    pub callback: Rc<dyn Fn()>,
    /// (container, key) pairs read during the latest run.
    pub dependencies: RefCell<IndexSet<(ContainerId, Key)>>,
    pub run_count: Cell<usize>,
    pub disposed: Cell<bool>,
    /// Set for the internal observer of a derived cell; once the cell's
    /// root container is gone the observer is purged.
    pub owner: Option<WeakContainer>,
}

impl ObserverNode {
    pub fn new(callback: Rc<dyn Fn()>, owner: Option<WeakContainer>) -> Self {
        Self {
            id: ObserverId::new(),
            callback,
            dependencies: RefCell::new(IndexSet::new()),
            run_count: Cell::new(0),
            disposed: Cell::new(false),
            owner,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.owner.as_ref().is_some_and(|owner| !owner.is_alive())
    }
}

/// Handle to a registered observer.
///
/// The observer keeps running for as long as its runtime lives; dropping
/// the handle does not stop it. Call [`dispose`](Self::dispose) to tear
/// it down.
#[derive(Clone)]
pub struct ObserverHandle {
    id: Option<ObserverId>,
    runtime: Weak<RuntimeInner>,
}

impl ObserverHandle {
    pub(crate) fn new(id: ObserverId, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            id: Some(id),
            runtime,
        }
    }

    /// Handle returned for an observer created while another was running.
    pub(crate) fn inert() -> Self {
        Self {
            id: None,
            runtime: Weak::new(),
        }
    }

    /// The observer's ID, `None` for an inert handle.
    pub fn id(&self) -> Option<ObserverId> {
        self.id
    }

    /// Whether this observer was absorbed into an enclosing observer.
    pub fn is_inert(&self) -> bool {
        self.id.is_none()
    }

    /// Remove the observer's subscriptions and exclude it from pending and
    /// future flushes.
    pub fn dispose(&self) {
        if let (Some(id), Some(runtime)) = (self.id, self.runtime.upgrade()) {
            runtime.unobserve(id);
        }
    }

    /// Whether the observer has been torn down (or its runtime dropped).
    pub fn is_disposed(&self) -> bool {
        self.node().map_or(true, |node| node.disposed.get())
    }

    /// Number of times the callback has run as a tracked observer.
    pub fn run_count(&self) -> usize {
        self.node().map_or(0, |node| node.run_count.get())
    }

    /// Number of (container, key) pairs read during the latest run.
    pub fn dependency_count(&self) -> usize {
        self.node()
            .map_or(0, |node| node.dependencies.borrow().len())
    }

    fn node(&self) -> Option<Rc<ObserverNode>> {
        let runtime = self.runtime.upgrade()?;
        runtime.observer(self.id?)
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_ids_are_unique() {
        let id1 = ObserverId::new();
        let id2 = ObserverId::new();
        let id3 = ObserverId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn inert_handle_reports_nothing() {
        let handle = ObserverHandle::inert();
        assert!(handle.is_inert());
        assert!(handle.is_disposed());
        assert_eq!(handle.run_count(), 0);
        handle.dispose();
    }

    #[test]
    fn orphaned_when_owner_dropped() {
        let owner = crate::value::Container::record([("value", 0)]);
        let node = ObserverNode::new(Rc::new(|| {}), Some(owner.downgrade()));
        assert!(!node.is_orphaned());
        drop(owner);
        assert!(node.is_orphaned());
    }
}
