//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, wrappers and
//! observers. It owns the registry, the wrapper cache, the tracking slot and
//! the scheduler, and it is the only place where they are combined.
//!
//! # How It Works
//!
//! 1. A cell is a root record with a single `value` field. Everything
//!    reachable from it is accessed through [`Reactive`] wrappers.
//!
//! 2. When an observer runs, the runtime clears its previous
//!    registrations and occupies the tracking slot; every read through a
//!    wrapper then lands in [`RuntimeInner::track`].
//!
//! 3. When a wrapper write changes something, [`RuntimeInner::notify`]
//!    queues the observers registered on the written key, logs the event,
//!    cancels the armed flush and arms a new one.
//!
//! 4. A flush takes the batch, re-runs every queued observer once, then
//!    hands each cell's mutation log to that cell's hook.
//!
//! # Ownership
//!
//! Wrappers, cells and observer handles point at the runtime weakly. When
//! the last [`Runtime`] clone is dropped all state goes with it, and any
//! surviving wrapper degrades to plain untracked access.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, error, trace, warn};

use super::cache::WrapperCache;
use super::cell::Cell;
use super::context::TrackingContext;
use super::executor::{FlushExecutor, ManualExecutor};
use super::log::{FlushReport, MutationBatch, MutationEvent, MutationKind};
use super::observer::{ObserverHandle, ObserverId, ObserverNode};
use super::registry::Registry;
use super::scheduler::{Batch, Scheduler};
use super::wrapper::{Reactive, WrapperNode};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::value::{Container, ContainerId, Key, Value, WeakContainer, ROOT_FIELD};

type Hook = Rc<dyn Fn(&MutationBatch)>;

struct HookEntry {
    owner: WeakContainer,
    hook: Hook,
}

/// Shared state behind a [`Runtime`].
pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    tracking: TrackingContext,
    registry: RefCell<Registry>,
    cache: RefCell<WrapperCache>,
    observers: RefCell<HashMap<ObserverId, Rc<ObserverNode>>>,
    scheduler: RefCell<Scheduler>,
    executor: Box<dyn FlushExecutor>,
    hooks: RefCell<HashMap<ContainerId, HookEntry>>,
    this: Weak<RuntimeInner>,
}

/// Handle to a reactive runtime. Clones share the same state.
///
/// A runtime is single-threaded: cells, wrappers and observers created by
/// it are `!Send`.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Runtime with the default configuration and a [`ManualExecutor`].
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_executor(config, ManualExecutor)
    }

    /// Runtime that arms its flushes on `executor`.
    pub fn with_executor(config: RuntimeConfig, executor: impl FlushExecutor + 'static) -> Self {
        let inner = Rc::new_cyclic(|this| RuntimeInner {
            config,
            tracking: TrackingContext::default(),
            registry: RefCell::new(Registry::default()),
            cache: RefCell::new(WrapperCache::default()),
            observers: RefCell::new(HashMap::new()),
            scheduler: RefCell::new(Scheduler::default()),
            executor: Box::new(executor),
            hooks: RefCell::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// A reference that does not keep the runtime alive.
    ///
    /// Observers that need the runtime (to observe or create cells) should
    /// capture this rather than a `Runtime` clone: the runtime owns its
    /// observers, so a strong clone inside a callback is a reference cycle.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Create an observable cell holding `initial`.
    ///
    /// Fails with [`Error::InvalidMutationContext`] when called from inside
    /// a running observer.
    pub fn observable(&self, initial: impl Into<Value>) -> Result<Cell> {
        self.create_cell(initial.into(), None)
    }

    /// Like [`observable`](Self::observable), with `hook` receiving the
    /// cell's mutation log once per flush.
    pub fn observable_with_hook(
        &self,
        initial: impl Into<Value>,
        hook: impl Fn(&MutationBatch) + 'static,
    ) -> Result<Cell> {
        self.create_cell(initial.into(), Some(Rc::new(hook)))
    }

    /// Create a cell whose value is recomputed from `derive` whenever
    /// something `derive` read changes.
    ///
    /// The computation runs once immediately. Its internal observer lives
    /// as long as the returned cell: once every clone of the cell is
    /// dropped, the next purge removes it.
    pub fn derived<F, V>(&self, derive: F) -> Result<Cell>
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
    {
        self.create_derived(move || derive().into(), None)
    }

    /// Like [`derived`](Self::derived), with a mutation hook on the
    /// derived cell.
    pub fn derived_with_hook<F, V>(
        &self,
        derive: F,
        hook: impl Fn(&MutationBatch) + 'static,
    ) -> Result<Cell>
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
    {
        self.create_derived(move || derive().into(), Some(Rc::new(hook)))
    }

    /// Register `callback` as an observer and run it once.
    ///
    /// The runtime owns the callback; capture the runtime itself through
    /// [`downgrade`](Self::downgrade).
    ///
    /// Called while another observer is running, the callback runs inline
    /// with its reads attributed to the outer observer, and the returned
    /// handle is inert.
    pub fn observe(&self, callback: impl Fn() + 'static) -> ObserverHandle {
        if self.inner.tracking.is_active() {
            trace!("nested observe runs inline");
            callback();
            return ObserverHandle::inert();
        }
        self.install(Rc::new(ObserverNode::new(Rc::new(callback), None)))
    }

    /// Tear down an observer by id. Unknown ids are ignored.
    pub fn unobserve(&self, observer: ObserverId) {
        self.inner.unobserve(observer);
    }

    /// Run `f` with tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.tracking.suspend();
        f()
    }

    /// Run every pending observer once, then deliver mutation logs.
    ///
    /// Writes made by the re-run observers are left for a later flush. A
    /// call made while a flush is already running returns an empty report.
    ///
    /// With panic isolation enabled, the whole batch runs even if some
    /// observers panic; the first panic is returned as
    /// [`Error::ObserverPanicked`].
    pub fn flush(&self) -> Result<FlushReport> {
        let (armed, batch) = {
            let mut scheduler = self.inner.scheduler.borrow_mut();
            if scheduler.is_flushing() {
                return Ok(FlushReport::default());
            }
            let armed = scheduler.disarm();
            let batch = scheduler.take_batch();
            if batch.is_some() {
                scheduler.set_flushing(true);
            }
            (armed, batch)
        };
        if let Some(armed) = armed {
            armed.cancel();
        }
        let Some(batch) = batch else {
            return Ok(FlushReport::default());
        };

        let _flushing = FlushingGuard(&self.inner.scheduler);
        self.inner.run_batch(batch)
    }

    /// Flush until nothing is pending.
    ///
    /// Returns the number of flushes run, or
    /// [`Error::SettleLimitExceeded`] when observers keep invalidating each
    /// other past `max_settle_rounds`.
    pub fn settle(&self) -> Result<usize> {
        if self.inner.scheduler.borrow().is_flushing() {
            return Ok(0);
        }
        let limit = self.inner.config.max_settle_rounds;
        let mut rounds = 0;
        while self.has_pending() {
            if rounds == limit {
                warn!(rounds, "observers did not settle");
                return Err(Error::SettleLimitExceeded { rounds });
            }
            self.flush()?;
            rounds += 1;
        }
        Ok(rounds)
    }

    /// Drop state belonging to containers and cells nobody holds anymore.
    ///
    /// Returns the number of entries removed.
    pub fn purge(&self) -> usize {
        self.inner.purge()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.scheduler.borrow().has_pending()
    }

    /// Whether an observer is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.is_active()
    }

    pub fn current_observer(&self) -> Option<ObserverId> {
        self.inner.tracking.current()
    }

    /// Observers registered on `key` of the container behind `target`.
    pub fn subscribers(&self, target: &Reactive, key: impl Into<Key>) -> Vec<ObserverId> {
        self.inner.registry.borrow().observers(target.id(), &key.into())
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Number of containers with at least one registration.
    pub fn registry_len(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Number of flushes that ran a batch.
    pub fn flush_count(&self) -> u64 {
        self.inner.scheduler.borrow().flush_count()
    }

    fn create_cell(&self, initial: Value, hook: Option<Hook>) -> Result<Cell> {
        if self.inner.tracking.is_active() {
            return Err(Error::InvalidMutationContext);
        }
        let root = Container::record([(ROOT_FIELD, initial)]);
        let node = WrapperNode::detached(root);
        self.inner
            .cache
            .borrow_mut()
            .insert(node.container.id(), &node);
        if let Some(hook) = hook {
            self.inner.hooks.borrow_mut().insert(
                node.container.id(),
                HookEntry {
                    owner: node.container.downgrade(),
                    hook,
                },
            );
        }
        debug!(cell = %node.container.id(), "created cell");
        Ok(Cell::new(Reactive::new(node, Rc::downgrade(&self.inner))))
    }

    fn create_derived(
        &self,
        derive: impl Fn() -> Value + 'static,
        hook: Option<Hook>,
    ) -> Result<Cell> {
        let cell = self.create_cell(Value::Undefined, hook)?;
        let target = cell.downgrade();
        let owner = cell.reactive().raw().downgrade();
        let callback = move || {
            let value = derive();
            if let Some(cell) = target.upgrade() {
                cell.set(value);
            }
        };
        self.install(Rc::new(ObserverNode::new(Rc::new(callback), Some(owner))));
        Ok(cell)
    }

    fn install(&self, node: Rc<ObserverNode>) -> ObserverHandle {
        let id = node.id;
        self.inner
            .observers
            .borrow_mut()
            .insert(id, Rc::clone(&node));
        debug!(observer = %id, derived = node.owner.is_some(), "registered observer");
        self.inner.run_observer(&node);
        ObserverHandle::new(id, Rc::downgrade(&self.inner))
    }
}

/// Weak counterpart of [`Runtime`].
#[derive(Clone)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(Runtime::from_inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("observers", &self.observer_count())
            .field("registry", &self.registry_len())
            .field("cache", &self.cache_len())
            .field("pending", &self.has_pending())
            .finish()
    }
}

struct FlushingGuard<'a>(&'a RefCell<Scheduler>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().set_flushing(false);
    }
}

impl RuntimeInner {
    pub(crate) fn observer(&self, id: ObserverId) -> Option<Rc<ObserverNode>> {
        self.observers.borrow().get(&id).cloned()
    }

    /// Register the active observer, if any, on `key` of `container`.
    pub(crate) fn track(&self, container: &Container, key: &Key) {
        let Some(observer) = self.tracking.current() else {
            return;
        };
        if !self.registry.borrow_mut().register(container, key, observer) {
            return;
        }
        if let Some(node) = self.observers.borrow().get(&observer) {
            node.dependencies
                .borrow_mut()
                .insert((container.id(), key.clone()));
        }
        trace!(%observer, container = %container.id(), %key, "registered dependency");
    }

    /// The wrapper for `child`, reached at `key` below `parent`.
    ///
    /// A container already wrapped keeps its first wrapper, including the
    /// path and cell it was first reached through.
    pub(crate) fn wrap(&self, parent: &WrapperNode, key: &Key, child: Container) -> Rc<WrapperNode> {
        let cached = self.cache.borrow().get(child.id());
        if let Some(node) = cached {
            return node;
        }
        let node = Rc::new(parent.child(key, child));
        self.cache.borrow_mut().insert(node.container.id(), &node);
        trace!(container = %node.container.id(), "wrapped container");
        node
    }

    /// Queue the observers of `key` (and of `also`) on `node`'s container,
    /// log the mutation and re-arm the flush.
    pub(crate) fn notify(&self, node: &WrapperNode, key: &Key, kind: MutationKind, also: &[Key]) {
        let container = node.container.id();
        let observers = {
            let mut registry = self.registry.borrow_mut();
            let mut observers = registry.observers(container, key);
            for extra in also {
                observers.extend(registry.observers(container, extra));
            }
            if kind == MutationKind::Delete {
                registry.remove_key(container, key);
            }
            observers
        };

        let mut path = node.path.clone();
        path.push(key.clone());
        trace!(%container, ?kind, observers = observers.len(), "mutation");
        self.scheduler
            .borrow_mut()
            .schedule(observers, node.cell, MutationEvent { kind, path });
        self.rearm();
    }

    fn rearm(&self) {
        let previous = self.scheduler.borrow_mut().disarm();
        if let Some(previous) = previous {
            previous.cancel();
        }

        let this = self.this.clone();
        let armed = self.executor.arm(Box::new(move || {
            let Some(inner) = this.upgrade() else {
                return;
            };
            if let Err(err) = Runtime::from_inner(inner).flush() {
                error!(%err, "deferred flush failed");
            }
        }));
        let replaced = self.scheduler.borrow_mut().rearm(armed);
        debug_assert!(replaced.is_none(), "flush armed twice");
    }

    pub(crate) fn run_observer(&self, node: &Rc<ObserverNode>) {
        if node.disposed.get() {
            return;
        }
        let callback = Rc::clone(&node.callback);
        match self.tracking.enter(node.id) {
            // nested: reads belong to the observer holding the slot
            None => callback(),
            Some(_guard) => {
                self.clear_dependencies(node);
                node.run_count.set(node.run_count.get() + 1);
                callback();
            }
        }
    }

    fn run_batch(&self, batch: Batch) -> Result<FlushReport> {
        let Batch {
            flush,
            observers,
            events,
        } = batch;
        debug!(flush, observers = observers.len(), events = events.len(), "flushing");

        let mut failure = None;
        let mut observers_run = 0;
        for id in observers {
            let Some(node) = self.observer(id) else {
                continue;
            };
            if node.disposed.get() {
                continue;
            }
            observers_run += 1;
            if let Err(err) = self.run_flushed(&node) {
                failure.get_or_insert(err);
            }
        }

        let report = FlushReport {
            flush,
            observers_run,
            events: events.len(),
        };
        self.deliver(flush, events);

        if self.config.purge_on_flush {
            self.purge();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn run_flushed(&self, node: &Rc<ObserverNode>) -> Result<()> {
        if !self.config.isolate_observer_panics {
            self.run_observer(node);
            return Ok(());
        }
        panic::catch_unwind(AssertUnwindSafe(|| self.run_observer(node))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            error!(observer = %node.id, %message, "observer panicked");
            Error::ObserverPanicked {
                observer: node.id,
                message,
            }
        })
    }

    fn deliver(&self, flush: u64, events: Vec<(ContainerId, MutationEvent)>) {
        let mut grouped: IndexMap<ContainerId, Vec<MutationEvent>> = IndexMap::new();
        for (cell, event) in events {
            grouped.entry(cell).or_default().push(event);
        }

        for (cell, events) in grouped {
            let hook = self
                .hooks
                .borrow()
                .get(&cell)
                .map(|entry| Rc::clone(&entry.hook));
            if let Some(hook) = hook {
                trace!(%cell, events = events.len(), "delivering mutation log");
                hook(&MutationBatch { flush, events });
            }
        }
    }

    fn clear_dependencies(&self, node: &ObserverNode) {
        let dependencies = std::mem::take(&mut *node.dependencies.borrow_mut());
        let mut registry = self.registry.borrow_mut();
        for (container, key) in dependencies {
            registry.unregister(container, &key, node.id);
        }
    }

    pub(crate) fn unobserve(&self, id: ObserverId) {
        let removed = self.observers.borrow_mut().remove(&id);
        let Some(node) = removed else {
            return;
        };
        node.disposed.set(true);
        self.clear_dependencies(&node);
        self.scheduler.borrow_mut().forget(id);
        debug!(observer = %id, "disposed observer");
    }

    fn purge(&self) -> usize {
        let orphans: Vec<ObserverId> = self
            .observers
            .borrow()
            .values()
            .filter(|node| node.is_orphaned())
            .map(|node| node.id)
            .collect();
        for id in &orphans {
            self.unobserve(*id);
        }

        let registry = self.registry.borrow_mut().purge();
        let cache = self.cache.borrow_mut().purge();
        let hooks = {
            let mut hooks = self.hooks.borrow_mut();
            let before = hooks.len();
            hooks.retain(|_, entry| entry.owner.is_alive());
            before - hooks.len()
        };

        let total = orphans.len() + registry + cache + hooks;
        if total > 0 {
            debug!(observers = orphans.len(), registry, cache, hooks, "purged");
        }
        total
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if let Some(armed) = self.scheduler.get_mut().disarm() {
            armed.cancel();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
