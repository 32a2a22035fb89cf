//! Wrapper Cache
//!
//! Identity map from a raw container to the wrapper node created for it,
//! so that every container identity has exactly one wrapper per runtime.
//! Entries are weak: the cache never keeps a wrapper (and therefore its
//! container) alive on its own.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::wrapper::WrapperNode;
use crate::value::ContainerId;

#[derive(Default)]
pub(crate) struct WrapperCache {
    entries: HashMap<ContainerId, Weak<WrapperNode>>,
}

impl WrapperCache {
    /// The live wrapper for `container`, if one exists.
    pub fn get(&self, container: ContainerId) -> Option<Rc<WrapperNode>> {
        self.entries.get(&container).and_then(Weak::upgrade)
    }

    pub fn insert(&mut self, container: ContainerId, node: &Rc<WrapperNode>) {
        self.entries.insert(container, Rc::downgrade(node));
    }

    /// Drop entries whose wrapper has been released.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, node| node.strong_count() > 0);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Container;

    #[test]
    fn cache_returns_live_wrapper_only() {
        let mut cache = WrapperCache::default();
        let container = Container::record([("a", 1)]);
        let node = WrapperNode::detached(container.clone());

        cache.insert(container.id(), &node);
        let hit = cache.get(container.id()).expect("wrapper is alive");
        assert!(Rc::ptr_eq(&hit, &node));

        drop(hit);
        drop(node);
        assert!(cache.get(container.id()).is_none());
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 0);
    }
}
