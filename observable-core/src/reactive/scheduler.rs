//! Mutation Batch Scheduler
//!
//! Collects the observers invalidated during one synchronous turn, together
//! with the ordered log of the mutations that invalidated them, until the
//! next flush.
//!
//! # Algorithm
//!
//! 1. Every notifying write appends its event to the log and adds the
//!    observers registered on the written key to the pending set. The set
//!    is insertion-ordered and duplicate-free, so an observer invalidated by
//!    five writes is queued once, at the position of the first.
//! 2. The runtime cancels any armed flush and arms a fresh one.
//! 3. The flush takes the whole batch out before running anything, so
//!    writes performed by the re-run observers land in a fresh batch served
//!    by a subsequent flush.
//!
//! Without this, five sequential writes to one cell would re-run every
//! dependent observer five times; with it each runs once against the final
//! state.

use indexmap::IndexSet;

use super::executor::ArmedFlush;
use super::log::MutationEvent;
use super::ObserverId;
use crate::value::ContainerId;

/// A batch taken out of the scheduler by a flush.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub flush: u64,
    pub observers: Vec<ObserverId>,
    /// Events tagged with the root container of the cell they belong to.
    pub events: Vec<(ContainerId, MutationEvent)>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    pending: IndexSet<ObserverId>,
    log: Vec<(ContainerId, MutationEvent)>,
    armed: Option<Box<dyn ArmedFlush>>,
    flushing: bool,
    flushes: u64,
}

impl Scheduler {
    /// Queue `observers` and log `event`.
    pub fn schedule(
        &mut self,
        observers: impl IntoIterator<Item = ObserverId>,
        cell: ContainerId,
        event: MutationEvent,
    ) {
        self.pending.extend(observers);
        self.log.push((cell, event));
    }

    /// Swap in a newly armed flush, returning the one it replaces.
    pub fn rearm(&mut self, armed: Box<dyn ArmedFlush>) -> Option<Box<dyn ArmedFlush>> {
        self.armed.replace(armed)
    }

    pub fn disarm(&mut self) -> Option<Box<dyn ArmedFlush>> {
        self.armed.take()
    }

    /// Take the pending batch, or `None` if nothing happened since the
    /// last flush.
    pub fn take_batch(&mut self) -> Option<Batch> {
        if !self.has_pending() {
            return None;
        }
        self.flushes += 1;
        Some(Batch {
            flush: self.flushes,
            observers: std::mem::take(&mut self.pending).into_iter().collect(),
            events: std::mem::take(&mut self.log),
        })
    }

    /// Drop `observer` from the pending set.
    pub fn forget(&mut self, observer: ObserverId) {
        self.pending.shift_remove(&observer);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.log.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    /// Number of flushes taken so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::log::MutationKind;
    use crate::value::{Container, Key};
    use smallvec::smallvec;

    fn event(field: &str) -> MutationEvent {
        MutationEvent {
            kind: MutationKind::Set,
            path: smallvec![Key::root(), Key::field(field)],
        }
    }

    #[test]
    fn pending_set_is_deduplicated_in_first_insertion_order() {
        let mut scheduler = Scheduler::default();
        let cell = Container::record([("value", 0)]).id();
        let a = ObserverId::new();
        let b = ObserverId::new();

        scheduler.schedule([b, a], cell, event("x"));
        scheduler.schedule([a, b], cell, event("y"));
        scheduler.schedule([b], cell, event("x"));

        let batch = scheduler.take_batch().expect("batch pending");
        assert_eq!(batch.flush, 1);
        assert_eq!(batch.observers, vec![b, a]);
        assert_eq!(batch.events.len(), 3);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn empty_scheduler_has_no_batch() {
        let mut scheduler = Scheduler::default();
        assert!(scheduler.take_batch().is_none());
        assert_eq!(scheduler.flush_count(), 0);
    }

    #[test]
    fn events_without_observers_still_form_a_batch() {
        let mut scheduler = Scheduler::default();
        let cell = Container::record([("value", 0)]).id();
        scheduler.schedule([], cell, event("a"));

        let batch = scheduler.take_batch().expect("log pending");
        assert!(batch.observers.is_empty());
        assert_eq!(batch.events.len(), 1);
    }

    #[test]
    fn forgotten_observers_are_not_flushed() {
        let mut scheduler = Scheduler::default();
        let cell = Container::record([("value", 0)]).id();
        let a = ObserverId::new();
        let b = ObserverId::new();

        scheduler.schedule([a, b], cell, event("a"));
        scheduler.forget(a);

        assert_eq!(scheduler.take_batch().unwrap().observers, vec![b]);
    }
}
