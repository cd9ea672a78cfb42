use super::config::ContextOptions;
use super::detector::{Command, ConcurrencyDetector, Interceptor};
use super::set::MemorySet;
use super::store::MemoryStore;
use super::tracker::{ChangeTracker, TrackedSet};
use crate::backend::PersistenceContext;
use crate::core::{Entity, EntityState, Error, Result};
use crate::query::{Predicate, Tracking};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// State shared by a context, its set accessors, queryables and cursors.
pub(crate) struct ContextInner {
    pub(super) store: MemoryStore,
    pub(super) options: ContextOptions,
    tracker: Mutex<ChangeTracker>,
    detector: ConcurrencyDetector,
    query_filters: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    disposed: AtomicBool,
}

impl ContextInner {
    /// Run one backend command.
    ///
    /// Fails with `ConcurrencyViolation` if another command on this context
    /// is in progress and thread safety checks are enabled.
    pub(super) fn run<R>(&self, command: Command, work: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let _section = self.detector.enter(&command)?;
        self.begin(&command)?;
        if let Some(latency) = self.options.command_latency {
            std::thread::sleep(latency);
        }
        work(self)
    }

    pub(super) async fn run_async<R>(
        &self,
        command: Command,
        cancel: &CancellationToken,
        work: impl FnOnce(&Self) -> Result<R> + Send,
    ) -> Result<R> {
        let _section = self.detector.enter(&command)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.begin(&command)?;
        match self.options.command_latency {
            Some(latency) => tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            },
            None => tokio::task::yield_now().await,
        }
        work(self)
    }

    fn begin(&self, command: &Command) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ObjectDisposed(format!("context '{}'", self.options.database)));
        }
        tracing::trace!(database = %self.options.database, command = %command, "executing command");
        for interceptor in &self.interceptors {
            interceptor.intercept(command)?;
        }
        Ok(())
    }

    pub(super) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn tracker(&self) -> Result<MutexGuard<'_, ChangeTracker>> {
        Ok(self.tracker.lock()?)
    }

    /// Apply `f` to the tracked entries of `set`.
    pub(super) fn track<T: Entity, R>(
        &self,
        set: &str,
        f: impl FnOnce(&mut TrackedSet<T>) -> Result<R>,
    ) -> Result<R> {
        let mut tracker = self.tracker()?;
        f(tracker.set_mut::<T>(set)?)
    }

    pub(super) fn tracking_of(&self, tracking: Option<Tracking>) -> Tracking {
        tracking.unwrap_or(self.options.default_tracking)
    }

    pub(super) fn query_filter<T: Entity>(&self) -> Option<Predicate<T>> {
        self.query_filters
            .get(&TypeId::of::<T>())
            .and_then(|filter| filter.downcast_ref::<Predicate<T>>())
            .cloned()
    }

    /// Tracked instance first, then the store. Rows loaded from the store
    /// become tracked unless the context defaults to no tracking.
    pub(super) fn find_entity<T: Entity>(&self, set: &str, key: &T::Key) -> Result<Option<T>> {
        let mut tracker = self.tracker()?;
        let tracked = tracker
            .set::<T>(set)
            .and_then(|tracked| tracked.get(key))
            .map(|(entity, state)| (entity.clone(), state));

        if let Some((entity, state)) = tracked {
            return Ok((state != EntityState::Deleted).then_some(entity));
        }

        let found = self.store.get::<T>(set, key)?;
        match found {
            Some(entity) if self.options.default_tracking == Tracking::TrackAll => {
                Ok(Some(tracker.set_mut::<T>(set)?.resolve(entity)))
            }
            other => Ok(other),
        }
    }

    fn save(&self, accept_all_changes: bool) -> Result<usize> {
        let mut tracker = self.tracker()?;
        let written = self.store.write(|tables| tracker.save(tables, accept_all_changes))?;
        tracing::debug!(database = %self.options.database, written, "saved changes");
        Ok(written)
    }

    fn close(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tracker()?.clear();
        tracing::debug!(database = %self.options.database, "context disposed");
        Ok(())
    }
}

/// A unit of work over a [`MemoryStore`].
///
/// Like any ORM context it supports one operation at a time: with thread
/// safety checks enabled, an operation that starts while another is running
/// fails with `ConcurrencyViolation`. Wrap it in a `GuardedContext` to share
/// it between tasks.
///
/// Clones are handles to the same context.
#[derive(Clone)]
pub struct MemoryContext {
    inner: Arc<ContextInner>,
}

impl MemoryContext {
    /// Context with default options
    pub fn new(store: MemoryStore) -> Self {
        Self::from_parts(store, ContextOptions::default(), HashMap::new(), Vec::new())
    }

    pub fn builder(store: MemoryStore) -> MemoryContextBuilder {
        MemoryContextBuilder::new(store)
    }

    fn from_parts(
        store: MemoryStore,
        options: ContextOptions,
        query_filters: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        tracing::debug!(
            database = %options.database,
            thread_safety_checks = options.thread_safety_checks,
            "memory context created"
        );
        Self {
            inner: Arc::new(ContextInner {
                store,
                tracker: Mutex::new(ChangeTracker::new()),
                detector: ConcurrencyDetector::new(options.thread_safety_checks),
                options,
                query_filters,
                interceptors,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl std::fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContext")
            .field("options", &self.inner.options)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[async_trait]
impl PersistenceContext for MemoryContext {
    type Set<T: Entity> = MemorySet<T>;

    fn set<T: Entity>(&self) -> Result<MemorySet<T>> {
        self.set_named::<T>(T::NAME)
    }

    fn set_named<T: Entity>(&self, name: &str) -> Result<MemorySet<T>> {
        let command = Command::Model { set: name.to_string() };
        self.inner.run(command, |inner| inner.store.check_set::<T>(name))?;
        Ok(MemorySet::new(Arc::clone(&self.inner), name))
    }

    fn save_changes(&self, accept_all_changes_on_success: bool) -> Result<usize> {
        self.inner
            .run(Command::Save, |inner| inner.save(accept_all_changes_on_success))
    }

    async fn save_changes_async(
        &self,
        accept_all_changes_on_success: bool,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.inner
            .run_async(Command::Save, cancel, |inner| inner.save(accept_all_changes_on_success))
            .await
    }

    fn accept_all_changes(&self) -> Result<()> {
        self.inner.run(Command::AcceptAllChanges, |inner| {
            inner.tracker()?.accept_all();
            Ok(())
        })
    }

    fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>> {
        let command = Command::Find { set: T::NAME.to_string() };
        self.inner.run(command, |inner| inner.find_entity::<T>(T::NAME, key))
    }

    async fn find_async<T: Entity>(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>> {
        let command = Command::Find { set: T::NAME.to_string() };
        self.inner
            .run_async(command, cancel, |inner| inner.find_entity::<T>(T::NAME, key))
            .await
    }

    fn dispose(&self) -> Result<()> {
        self.inner.close()
    }

    async fn dispose_async(&self) -> Result<()> {
        self.inner.close()
    }
}

/// Builder for [`MemoryContext`]
pub struct MemoryContextBuilder {
    store: MemoryStore,
    options: ContextOptions,
    query_filters: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl MemoryContextBuilder {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            options: ContextOptions::default(),
            query_filters: HashMap::new(),
            interceptors: Vec::new(),
        }
    }

    pub fn options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    /// Global filter applied to every query over `T` unless the query opts
    /// out with `ignore_query_filters`. Replaces any earlier filter for `T`.
    pub fn query_filter<T: Entity>(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let predicate: Predicate<T> = Arc::new(predicate);
        self.query_filters.insert(TypeId::of::<T>(), Arc::new(predicate));
        self
    }

    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> Result<MemoryContext> {
        self.options.validate().map_err(Error::Configuration)?;
        Ok(MemoryContext::from_parts(
            self.store,
            self.options,
            self.query_filters,
            self.interceptors,
        ))
    }
}
