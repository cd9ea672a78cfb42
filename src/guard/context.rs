use super::set::GuardedSet;
use crate::backend::{EntitySet, PersistenceContext};
use crate::core::{ContextId, Entity, EntityEntry, Result};
use crate::sync::ContextLock;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A persistence context that can be shared by concurrent callers.
///
/// Owns the context lock. Every operation that reads or writes the wrapped
/// context's state runs in a critical section; query composition does not.
///
/// The lock is not re-entrant. Code running inside a critical section
/// (query predicates, selectors, include loaders, closures passed to
/// [`GuardedContext::exclusive`]) must not call back into the same guarded
/// context, or it waits forever. Work that needs several backend calls as
/// one unit belongs in a single `exclusive` section.
pub struct GuardedContext<C: PersistenceContext> {
    inner: C,
    lock: ContextLock,
}

impl<C: PersistenceContext> GuardedContext<C> {
    pub fn new(inner: C) -> Self {
        let context_id = ContextId::new();
        tracing::debug!(context_id = %context_id, "guarded context created");
        Self {
            inner,
            lock: ContextLock::new(context_id),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.lock.context_id()
    }

    pub fn lock(&self) -> &ContextLock {
        &self.lock
    }

    pub fn is_disposed(&self) -> bool {
        self.lock.is_disposed()
    }

    /// Run several backend calls as one critical section.
    ///
    /// `f` receives the unguarded context and must only use that handle.
    pub fn exclusive<R>(&self, f: impl FnOnce(&C) -> Result<R>) -> Result<R> {
        self.lock.with_lock("context.exclusive", || f(&self.inner))
    }

    /// Async form of [`GuardedContext::exclusive`]. The wait for the lock
    /// honours `cancel`; `f` only runs once the lock is held.
    ///
    /// ```
    /// use futures::FutureExt;
    /// use guardctx::memory::{MemoryContext, MemoryStore};
    /// use guardctx::prelude::*;
    ///
    /// #[derive(Debug, Clone, Entity)]
    /// struct Counter {
    ///     id: u32,
    ///     hits: u64,
    /// }
    ///
    /// # tokio_test::block_on(async {
    /// let store = MemoryStore::new();
    /// store.seed(vec![Counter { id: 1, hits: 0 }]).unwrap();
    /// let context = GuardedContext::new(MemoryContext::new(store));
    /// let cancel = CancellationToken::new();
    ///
    /// let saved = context
    ///     .exclusive_async(&cancel, |inner| {
    ///         async move {
    ///             let never = CancellationToken::new();
    ///             let mut counter = inner.find_async::<Counter>(&1, &never).await?.unwrap();
    ///             counter.hits += 1;
    ///             inner.set::<Counter>()?.update(counter)?;
    ///             inner.save_changes_async(true, &never).await
    ///         }
    ///         .boxed()
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(saved, 1);
    /// # });
    /// ```
    pub async fn exclusive_async<R, F>(&self, cancel: &CancellationToken, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a C) -> BoxFuture<'a, Result<R>>,
    {
        let _guard = self.lock.acquire_async("context.exclusive_async", cancel).await?;
        f(&self.inner).await
    }

    pub fn add<T: Entity>(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("context.add", || self.inner.set::<T>()?.add(entity))
    }

    pub async fn add_async<T: Entity>(&self, entity: T, cancel: &CancellationToken) -> Result<EntityEntry<T>> {
        let _guard = self.lock.acquire_async("context.add_async", cancel).await?;
        let set = self.inner.set::<T>()?;
        set.add_async(entity, cancel).await
    }

    pub fn attach<T: Entity>(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("context.attach", || self.inner.set::<T>()?.attach(entity))
    }

    pub fn update<T: Entity>(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("context.update", || self.inner.set::<T>()?.update(entity))
    }

    pub fn remove<T: Entity>(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("context.remove", || self.inner.set::<T>()?.remove(entity))
    }

    pub fn entry<T: Entity>(&self, entity: &T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("context.entry", || self.inner.set::<T>()?.entry(entity))
    }
}

#[async_trait]
impl<C: PersistenceContext> PersistenceContext for GuardedContext<C> {
    type Set<T: Entity> = GuardedSet<T, C::Set<T>>;

    /// Accessor construction may read backend model metadata, so it is
    /// guarded too.
    fn set<T: Entity>(&self) -> Result<Self::Set<T>> {
        let inner = self.lock.with_lock("context.set", || self.inner.set::<T>())?;
        Ok(GuardedSet::new(inner, self.lock.clone()))
    }

    fn set_named<T: Entity>(&self, name: &str) -> Result<Self::Set<T>> {
        let inner = self.lock.with_lock("context.set_named", || self.inner.set_named::<T>(name))?;
        Ok(GuardedSet::new(inner, self.lock.clone()))
    }

    fn save_changes(&self, accept_all_changes_on_success: bool) -> Result<usize> {
        self.lock.with_lock("context.save_changes", || {
            self.inner.save_changes(accept_all_changes_on_success)
        })
    }

    async fn save_changes_async(
        &self,
        accept_all_changes_on_success: bool,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let _guard = self.lock.acquire_async("context.save_changes_async", cancel).await?;
        self.inner.save_changes_async(accept_all_changes_on_success, cancel).await
    }

    fn accept_all_changes(&self) -> Result<()> {
        self.lock.with_lock("context.accept_all_changes", || self.inner.accept_all_changes())
    }

    fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>> {
        self.lock.with_lock("context.find", || self.inner.find::<T>(key))
    }

    async fn find_async<T: Entity>(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>> {
        let _guard = self.lock.acquire_async("context.find_async", cancel).await?;
        self.inner.find_async::<T>(key, cancel).await
    }

    /// Disposes the lock first, so pending and later guarded calls fail
    /// with `ObjectDisposed`, then the wrapped context. Callers must not
    /// have an operation in flight.
    fn dispose(&self) -> Result<()> {
        tracing::debug!(context_id = %self.context_id(), "disposing guarded context");
        self.lock.dispose();
        self.inner.dispose()
    }

    async fn dispose_async(&self) -> Result<()> {
        tracing::debug!(context_id = %self.context_id(), "disposing guarded context");
        self.lock.dispose();
        self.inner.dispose_async().await
    }
}
