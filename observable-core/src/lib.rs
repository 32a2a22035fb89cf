//! Observable Core
//!
//! This crate provides a fine-grained reactive engine. It implements:
//!
//! - Observable cells over dynamically shaped values
//! - Per-key dependency tracking through container wrappers
//! - Batched, deduplicated re-execution of observers
//! - Derived cells and per-cell mutation logs
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the value model (scalars, records, sequences, maps, sets)
//! - `reactive`: runtime, wrappers, observers and the flush scheduler
//! - `config`: runtime tunables
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use observable_core::{Runtime, Value};
//!
//! let rt = Runtime::new();
//! let user = rt
//!     .observable(Value::record([("name", Value::from("Ada")), ("age", Value::from(36))]))
//!     .unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&seen);
//! let source = user.clone();
//! rt.observe(move || {
//!     let name = source.get().get("name").unwrap();
//!     log.borrow_mut().push(name.as_str().unwrap_or_default().to_string());
//! });
//!
//! let state = user.get();
//! let record = state.reactive().unwrap();
//! record.set("age", 37).unwrap(); // not read by the observer
//! record.set("name", "Grace").unwrap();
//! rt.settle().unwrap();
//!
//! assert_eq!(*seen.borrow(), ["Ada", "Grace"]);
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use reactive::{
    Cell, MutationBatch, MutationEvent, MutationKind, Observed, ObserverHandle, ObserverId,
    Reactive, Runtime, WeakRuntime,
};
pub use value::{EntryKey, Key, Shape, Value};
