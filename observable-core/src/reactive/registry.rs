//! Access-Path Registry
//!
//! For every raw container an observer has read through, the registry maps
//! each key read to the ordered, duplicate-free set of observers depending
//! on it. Entries hold their container weakly so that abandoned containers
//! can be purged.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::ObserverId;
use crate::value::{Container, ContainerId, Key, WeakContainer};

struct RegistryEntry {
    container: WeakContainer,
    keys: HashMap<Key, IndexSet<ObserverId>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<ContainerId, RegistryEntry>,
}

impl Registry {
    /// Record that `observer` read `key` of `container`.
    ///
    /// Returns `true` if the registration is new.
    pub fn register(&mut self, container: &Container, key: &Key, observer: ObserverId) -> bool {
        let entry = self
            .entries
            .entry(container.id())
            .or_insert_with(|| RegistryEntry {
                container: container.downgrade(),
                keys: HashMap::new(),
            });

        match entry.keys.get_mut(key) {
            Some(observers) => observers.insert(observer),
            None => {
                entry.keys.insert(key.clone(), IndexSet::from([observer]));
                true
            }
        }
    }

    /// Observers depending on `key` of `container`, in registration order.
    pub fn observers(&self, container: ContainerId, key: &Key) -> Vec<ObserverId> {
        self.entries
            .get(&container)
            .and_then(|entry| entry.keys.get(key))
            .map(|observers| observers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a single registration.
    pub fn unregister(&mut self, container: ContainerId, key: &Key, observer: ObserverId) {
        let Some(entry) = self.entries.get_mut(&container) else {
            return;
        };
        if let Some(observers) = entry.keys.get_mut(key) {
            observers.shift_remove(&observer);
            if observers.is_empty() {
                entry.keys.remove(key);
            }
        }
        if entry.keys.is_empty() {
            self.entries.remove(&container);
        }
    }

    /// Drop every registration for `key` of `container`.
    pub fn remove_key(&mut self, container: ContainerId, key: &Key) {
        if let Some(entry) = self.entries.get_mut(&container) {
            entry.keys.remove(key);
            if entry.keys.is_empty() {
                self.entries.remove(&container);
            }
        }
    }

    /// Drop entries whose container is no longer reachable.
    ///
    /// Returns the number of entries removed.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.container.is_alive());
        before - self.entries.len()
    }

    /// Number of containers with at least one registration.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
