//! Reactive Engine
//!
//! This module implements fine-grained dependency tracking over observable
//! state: cells, the wrappers that intercept access to the containers they
//! hold, and the observers re-run when something they read changes.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] holds one [`Value`](crate::value::Value). Reading it, or any
//! container reachable from it, through the returned [`Reactive`] wrappers
//! records a dependency of the running observer on exactly the keys read.
//!
//! ## Observers
//!
//! An observer is a callback registered with [`Runtime::observe`]. It runs
//! once immediately, and again after any change to something it read.
//! Derived cells are cells kept up to date by an internal observer.
//!
//! ## Batching
//!
//! Writes never run observers synchronously. They queue the affected
//! observers and arm a deferred flush; each flush re-runs every queued
//! observer once against the final state, then hands each cell's ordered
//! mutation log to that cell's hook.
//!
//! # Implementation Notes
//!
//! Everything lives on one thread behind `Rc`/`RefCell`. The registry maps
//! `(container, key)` to observers; it is rebuilt per observer on every
//! run, so a branch not taken stops producing notifications.

mod cache;
mod cell;
mod context;
mod executor;
mod log;
mod observer;
mod registry;
mod runtime;
mod scheduler;
mod wrapper;

pub use cell::{Cell, WeakCell};
pub use executor::{ArmedFlush, FlushExecutor, FlushTask, ManualExecutor, TokioExecutor};
pub use log::{FlushReport, MutationBatch, MutationEvent, MutationKind};
pub use observer::{ObserverHandle, ObserverId};
pub use runtime::{Runtime, WeakRuntime};
pub use wrapper::{Observed, Reactive};
