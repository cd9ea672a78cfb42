// ============================================================================
// Persistence Backend Surface
// ============================================================================
//
// The operations a persistence context exposes. A backend context is a
// stateful unit of work (change tracker, cached entities, live connection)
// and is only required to support one operation at a time. The guarded
// wrappers implement the same surface on top of any backend.
//
// ============================================================================

use crate::core::{Entity, EntityEntry, Result};
use crate::query::Queryable;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-entity-type accessor of a context
#[async_trait]
pub trait EntitySet<T: Entity>: Send + Sync {
    /// Name of the underlying set
    fn name(&self) -> &str;

    fn add(&self, entity: T) -> Result<EntityEntry<T>>;

    async fn add_async(&self, entity: T, cancel: &CancellationToken) -> Result<EntityEntry<T>>;

    fn add_range(&self, entities: Vec<T>) -> Result<()>;

    async fn add_range_async(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()>;

    fn attach(&self, entity: T) -> Result<EntityEntry<T>>;

    fn attach_range(&self, entities: Vec<T>) -> Result<()>;

    fn update(&self, entity: T) -> Result<EntityEntry<T>>;

    fn update_range(&self, entities: Vec<T>) -> Result<()>;

    fn remove(&self, entity: T) -> Result<EntityEntry<T>>;

    fn remove_range(&self, entities: Vec<T>) -> Result<()>;

    /// Tracking entry for `entity`; `Detached` if it is not tracked.
    fn entry(&self, entity: &T) -> Result<EntityEntry<T>>;

    fn find(&self, key: &T::Key) -> Result<Option<T>>;

    async fn find_async(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>>;

    /// Tracked entities of this set that are not marked for deletion
    fn local(&self) -> Result<Vec<T>>;

    /// Query view over the whole set. Building it executes nothing.
    fn as_queryable(&self) -> Arc<dyn Queryable<T>>;
}

/// A unit-of-work context
#[async_trait]
pub trait PersistenceContext: Send + Sync + 'static {
    type Set<T: Entity>: EntitySet<T>;

    /// Accessor for the default set of `T`
    fn set<T: Entity>(&self) -> Result<Self::Set<T>>;

    /// Accessor for a named set holding `T`
    fn set_named<T: Entity>(&self, name: &str) -> Result<Self::Set<T>>;

    /// Flush pending changes; returns the number of entries written.
    fn save_changes(&self, accept_all_changes_on_success: bool) -> Result<usize>;

    async fn save_changes_async(
        &self,
        accept_all_changes_on_success: bool,
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// Mark every tracked entry as persisted.
    fn accept_all_changes(&self) -> Result<()>;

    fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>>;

    async fn find_async<T: Entity>(&self, key: &T::Key, cancel: &CancellationToken) -> Result<Option<T>>;

    fn dispose(&self) -> Result<()>;

    async fn dispose_async(&self) -> Result<()>;
}
