//! Flush executors.
//!
//! The scheduler never runs a flush synchronously from a write. It arms a
//! deferred task through a [`FlushExecutor`] and cancels that task if
//! another write arrives before it fired, so any number of writes in one
//! turn collapse into a single flush.

use std::panic::{self, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// Deferred flush, run at most once.
pub type FlushTask = Box<dyn FnOnce()>;

/// A flush armed on an executor.
pub trait ArmedFlush {
    /// Cancel the flush. A cancelled flush never runs, not even partially.
    fn cancel(self: Box<Self>);
}

/// Something able to run a flush after the current call stack unwinds.
pub trait FlushExecutor {
    fn arm(&self, task: FlushTask) -> Box<dyn ArmedFlush>;
}

/// Executor that never fires on its own.
///
/// The host drives the engine explicitly with
/// [`Runtime::flush`](super::Runtime::flush) or
/// [`Runtime::settle`](super::Runtime::settle), typically once per event
/// loop iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualExecutor;

struct Unarmed;

impl ArmedFlush for Unarmed {
    fn cancel(self: Box<Self>) {}
}

impl FlushExecutor for ManualExecutor {
    fn arm(&self, _task: FlushTask) -> Box<dyn ArmedFlush> {
        Box::new(Unarmed)
    }
}

/// Executor arming each flush as a zero-delay local tokio task.
///
/// Flushes only fire from inside a [`tokio::task::LocalSet`]; cancelling
/// aborts the task. Outside of one, arming logs a warning and leaves the
/// batch pending for an explicit [`Runtime::flush`](super::Runtime::flush).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioExecutor;

struct TokioArmed(JoinHandle<()>);

impl ArmedFlush for TokioArmed {
    fn cancel(self: Box<Self>) {
        self.0.abort();
    }
}

impl FlushExecutor for TokioExecutor {
    fn arm(&self, task: FlushTask) -> Box<dyn ArmedFlush> {
        if Handle::try_current().is_err() {
            warn!("no tokio runtime, flush left to the host");
            return Box::new(Unarmed);
        }
        // spawn_local panics without a LocalSet
        let spawned = panic::catch_unwind(AssertUnwindSafe(move || {
            tokio::task::spawn_local(async move { task() })
        }));
        match spawned {
            Ok(handle) => Box::new(TokioArmed(handle)),
            Err(_) => {
                warn!("not inside a LocalSet, flush left to the host");
                Box::new(Unarmed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Executor that queues armed tasks so tests can fire them by hand.
    #[derive(Clone, Default)]
    pub struct QueueExecutor {
        pub slots: Rc<RefCell<Vec<Option<FlushTask>>>>,
        pub cancelled: Rc<RefCell<usize>>,
    }

    impl QueueExecutor {
        /// Run every armed, non-cancelled task. Returns how many ran.
        pub fn fire(&self) -> usize {
            let tasks: Vec<FlushTask> = self
                .slots
                .borrow_mut()
                .iter_mut()
                .filter_map(Option::take)
                .collect();
            let count = tasks.len();
            for task in tasks {
                task();
            }
            count
        }
    }

    struct QueueArmed {
        index: usize,
        slots: Rc<RefCell<Vec<Option<FlushTask>>>>,
        cancelled: Rc<RefCell<usize>>,
    }

    impl ArmedFlush for QueueArmed {
        fn cancel(self: Box<Self>) {
            if let Some(slot) = self.slots.borrow_mut().get_mut(self.index) {
                if slot.take().is_some() {
                    *self.cancelled.borrow_mut() += 1;
                }
            }
        }
    }

    impl FlushExecutor for QueueExecutor {
        fn arm(&self, task: FlushTask) -> Box<dyn ArmedFlush> {
            let mut slots = self.slots.borrow_mut();
            slots.push(Some(task));
            Box::new(QueueArmed {
                index: slots.len() - 1,
                slots: Rc::clone(&self.slots),
                cancelled: Rc::clone(&self.cancelled),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::testing::QueueExecutor;
    use super::*;

    #[test]
    fn manual_executor_never_runs_tasks() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let armed = ManualExecutor.arm(Box::new(move || flag.set(true)));
        armed.cancel();
        assert!(!ran.get());
    }

    #[test]
    fn cancelled_task_does_not_fire() {
        let executor = QueueExecutor::default();
        let runs = Rc::new(Cell::new(0));

        let first = {
            let runs = Rc::clone(&runs);
            executor.arm(Box::new(move || runs.set(runs.get() + 1)))
        };
        first.cancel();
        {
            let runs = Rc::clone(&runs);
            executor.arm(Box::new(move || runs.set(runs.get() + 10)));
        }

        assert_eq!(executor.fire(), 1);
        assert_eq!(runs.get(), 10);
        assert_eq!(*executor.cancelled.borrow(), 1);
    }

    #[test]
    fn tokio_executor_without_runtime_stays_unarmed() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let armed = TokioExecutor.arm(Box::new(move || flag.set(true)));
        armed.cancel();
        assert!(!ran.get());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tokio_executor_without_local_set_stays_unarmed() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let _armed = TokioExecutor.arm(Box::new(move || flag.set(true)));
        tokio::task::yield_now().await;
        assert!(!ran.get());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tokio_executor_runs_after_yield_unless_aborted() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let runs = Rc::new(Cell::new(0));

                let aborted = {
                    let runs = Rc::clone(&runs);
                    TokioExecutor.arm(Box::new(move || runs.set(runs.get() + 1)))
                };
                aborted.cancel();
                {
                    let runs = Rc::clone(&runs);
                    TokioExecutor.arm(Box::new(move || runs.set(runs.get() + 10)));
                }

                // nothing runs until the current task yields
                assert_eq!(runs.get(), 0);
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(runs.get(), 10);
            })
            .await;
    }
}
