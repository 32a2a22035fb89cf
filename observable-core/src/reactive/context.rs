//! Tracking Context
//!
//! The tracking context holds the observer whose callback is currently
//! running. Reads through a reactive wrapper register that observer as a
//! dependent of the key they touch.
//!
//! # Implementation
//!
//! Unlike a stack of contexts, there is a single slot. An observer invoked
//! while another one is active does not take the slot: its reads are
//! attributed to the outer observer, which stays the single source of
//! truth for everything read during its run.
//!
//! The slot is only ever changed through [`TrackingGuard`], which restores
//! the previous occupant when dropped, so the slot is reset even when the
//! callback panics.

use std::cell::Cell;

use super::ObserverId;

/// The active-observer slot of one runtime.
#[derive(Debug, Default)]
pub(crate) struct TrackingContext {
    active: Cell<Option<ObserverId>>,
}

impl TrackingContext {
    /// Occupy the slot with `observer`.
    ///
    /// Returns `None` when another observer already holds the slot; the
    /// caller is then running nested and must leave attribution alone.
    pub fn enter(&self, observer: ObserverId) -> Option<TrackingGuard<'_>> {
        if self.active.get().is_some() {
            return None;
        }
        self.active.set(Some(observer));
        Some(TrackingGuard {
            slot: &self.active,
            previous: None,
            expected: Some(observer),
        })
    }

    /// Empty the slot until the guard drops. Reads made meanwhile are not
    /// attributed to anyone.
    pub fn suspend(&self) -> TrackingGuard<'_> {
        let previous = self.active.replace(None);
        TrackingGuard {
            slot: &self.active,
            previous,
            expected: None,
        }
    }

    /// The observer currently being tracked, if any.
    pub fn current(&self) -> Option<ObserverId> {
        self.active.get()
    }

    pub fn is_active(&self) -> bool {
        self.active.get().is_some()
    }
}

/// Guard that restores the slot when dropped.
pub(crate) struct TrackingGuard<'a> {
    slot: &'a Cell<Option<ObserverId>>,
    previous: Option<ObserverId>,
    expected: Option<ObserverId>,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        let current = self.slot.replace(self.previous);

        // Catch guards released out of order.
        debug_assert_eq!(
            current, self.expected,
            "tracking slot mismatch: expected {:?}, found {:?}",
            self.expected, current
        );
    }
}
