use super::context::ContextInner;
use super::detector::Command;
use super::query::MemoryQueryable;
use super::tracker::TrackedSet;
use crate::backend::EntitySet;
use crate::core::{Entity, EntityEntry, Result};
use crate::query::{Expression, Queryable};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Accessor for one entity set of a [`MemoryContext`](super::MemoryContext)
pub struct MemorySet<T: Entity> {
    inner: Arc<ContextInner>,
    name: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> MemorySet<T> {
    pub(crate) fn new(inner: Arc<ContextInner>, name: &str) -> Self {
        Self {
            inner,
            name: name.to_string(),
            _entity: PhantomData,
        }
    }

    fn command(&self, operation: &'static str) -> Command {
        Command::Track {
            set: self.name.clone(),
            operation,
        }
    }

    fn each(&self, operation: &'static str, entities: Vec<T>, f: fn(&mut TrackedSet<T>, T) -> Result<()>) -> Result<()> {
        self.inner.run(self.command(operation), |inner| {
            inner.track::<T, _>(&self.name, |set| entities.into_iter().try_for_each(|entity| f(set, entity)))
        })
    }
}

impl<T: Entity> std::fmt::Debug for MemorySet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySet").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<T: Entity> EntitySet<T> for MemorySet<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, entity: T) -> Result<EntityEntry<T>> {
        self.inner
            .run(self.command("add"), |inner| inner.track::<T, _>(&self.name, |set| set.add(entity)))
    }

    async fn add_async(&self, entity: T, cancel: &CancellationToken) -> Result<EntityEntry<T>> {
        self.inner
            .run_async(self.command("add"), cancel, |inner| {
                inner.track::<T, _>(&self.name, |set| set.add(entity))
            })
            .await
    }

    fn add_range(&self, entities: Vec<T>) -> Result<()> {
        self.each("add_range", entities, |set, entity| set.add(entity).map(|_| ()))
    }

    async fn add_range_async(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()> {
        self.inner
            .run_async(self.command("add_range"), cancel, |inner| {
                inner.track::<T, _>(&self.name, |set| {
                    entities.into_iter().try_for_each(|entity| set.add(entity).map(|_| ()))
                })
            })
            .await
    }

    fn attach(&self, entity: T) -> Result<EntityEntry<T>> {
        self.inner
            .run(self.command("attach"), |inner| inner.track::<T, _>(&self.name, |set| set.attach(entity)))
    }

    fn attach_range(&self, entities: Vec<T>) -> Result<()> {
        self.each("attach_range", entities, |set, entity| set.attach(entity).map(|_| ()))
    }

    fn update(&self, entity: T) -> Result<EntityEntry<T>> {
        self.inner
            .run(self.command("update"), |inner| inner.track::<T, _>(&self.name, |set| Ok(set.update(entity))))
    }

    fn update_range(&self, entities: Vec<T>) -> Result<()> {
        self.each("update_range", entities, |set, entity| {
            set.update(entity);
            Ok(())
        })
    }

    fn remove(&self, entity: T) -> Result<EntityEntry<T>> {
        self.inner
            .run(self.command("remove"), |inner| inner.track::<T, _>(&self.name, |set| Ok(set.remove(entity))))
    }

    fn remove_range(&self, entities: Vec<T>) -> Result<()> {
        self.each("remove_range", entities, |set, entity| {
            set.remove(entity);
            Ok(())
        })
    }

    fn entry(&self, entity: &T) -> Result<EntityEntry<T>> {
        self.inner
            .run(self.command("entry"), |inner| inner.track::<T, _>(&self.name, |set| Ok(set.entry(entity))))
    }

    fn find(&self, key: &T::Key) -> Result<Option<T>> {
        let command = Command::Find { set: self.name.clone() };
        self.inner.run(command, |inner| inner.find_entity::<T>(&self.name, key))
    }

    async fn find_async(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>> {
        let command = Command::Find { set: self.name.clone() };
        self.inner
            .run_async(command, cancel, |inner| inner.find_entity::<T>(&self.name, key))
            .await
    }

    fn local(&self) -> Result<Vec<T>> {
        self.inner
            .run(self.command("local"), |inner| inner.track::<T, _>(&self.name, |set| Ok(set.local())))
    }

    fn as_queryable(&self) -> Arc<dyn Queryable<T>> {
        Arc::new(MemoryQueryable::new(
            Arc::clone(&self.inner),
            Expression::root(self.name.as_str()),
        ))
    }
}
