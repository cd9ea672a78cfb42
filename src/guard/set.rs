use super::queryable::GuardedQueryable;
use crate::backend::EntitySet;
use crate::core::{Entity, EntityEntry, Result};
use crate::query::Queryable;
use crate::sync::ContextLock;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entity set accessor whose every direct call runs in its own critical
/// section. Query views obtained from it are guarded queryables.
pub struct GuardedSet<T: Entity, S: EntitySet<T>> {
    inner: S,
    lock: ContextLock,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, S: EntitySet<T>> GuardedSet<T, S> {
    pub(crate) fn new(inner: S, lock: ContextLock) -> Self {
        Self {
            inner,
            lock,
            _entity: PhantomData,
        }
    }

    /// Lock-free query view over the set.
    pub fn as_queryable(&self) -> GuardedQueryable<T> {
        GuardedQueryable::new(self.inner.as_queryable(), self.lock.clone())
    }

    /// Same view as `as_queryable`; enumerate it with `stream` or
    /// `async_cursor`.
    pub fn as_async_enumerable(&self) -> GuardedQueryable<T> {
        self.as_queryable()
    }
}

#[async_trait]
impl<T: Entity, S: EntitySet<T>> EntitySet<T> for GuardedSet<T, S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn add(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("set.add", || self.inner.add(entity))
    }

    async fn add_async(&self, entity: T, cancel: &CancellationToken) -> Result<EntityEntry<T>> {
        let _guard = self.lock.acquire_async("set.add_async", cancel).await?;
        self.inner.add_async(entity, cancel).await
    }

    fn add_range(&self, entities: Vec<T>) -> Result<()> {
        self.lock.with_lock("set.add_range", || self.inner.add_range(entities))
    }

    async fn add_range_async(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock.acquire_async("set.add_range_async", cancel).await?;
        self.inner.add_range_async(entities, cancel).await
    }

    fn attach(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("set.attach", || self.inner.attach(entity))
    }

    fn attach_range(&self, entities: Vec<T>) -> Result<()> {
        self.lock.with_lock("set.attach_range", || self.inner.attach_range(entities))
    }

    fn update(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("set.update", || self.inner.update(entity))
    }

    fn update_range(&self, entities: Vec<T>) -> Result<()> {
        self.lock.with_lock("set.update_range", || self.inner.update_range(entities))
    }

    fn remove(&self, entity: T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("set.remove", || self.inner.remove(entity))
    }

    fn remove_range(&self, entities: Vec<T>) -> Result<()> {
        self.lock.with_lock("set.remove_range", || self.inner.remove_range(entities))
    }

    fn entry(&self, entity: &T) -> Result<EntityEntry<T>> {
        self.lock.with_lock("set.entry", || self.inner.entry(entity))
    }

    fn find(&self, key: &T::Key) -> Result<Option<T>> {
        self.lock.with_lock("set.find", || self.inner.find(key))
    }

    async fn find_async(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>> {
        let _guard = self.lock.acquire_async("set.find_async", cancel).await?;
        self.inner.find_async(key, cancel).await
    }

    fn local(&self) -> Result<Vec<T>> {
        self.lock.with_lock("set.local", || self.inner.local())
    }

    fn as_queryable(&self) -> Arc<dyn Queryable<T>> {
        Arc::new(GuardedSet::as_queryable(self))
    }
}
