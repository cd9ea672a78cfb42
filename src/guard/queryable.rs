// ============================================================================
// Guarded Queryable / Query Provider
// ============================================================================
//
// Composition never takes the lock: it only builds a new expression and
// wraps the provider's queryable. Execution takes the lock for the duration
// of the backend call. Enumeration takes it briefly to open the cursor and
// then once per advance.
//
// ============================================================================

use super::cursor::{GuardedAsyncCursor, GuardedCursor};
use crate::core::{Entity, Error, Result};
use crate::query::{
    AsyncCursor, Cursor, Expression, QueryProvider, Queryable, Scalar, Terminal,
};
use crate::sync::ContextLock;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct GuardedProvider<T: Entity> {
    inner: Arc<dyn QueryProvider<T>>,
    lock: ContextLock,
}

impl<T: Entity> Clone for GuardedProvider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lock: self.lock.clone(),
        }
    }
}

impl<T: Entity> GuardedProvider<T> {
    pub(crate) fn new(inner: Arc<dyn QueryProvider<T>>, lock: ContextLock) -> Self {
        Self { inner, lock }
    }

    /// Lock-free: wraps whatever the backend builds.
    pub fn create_query(&self, expression: Expression<T>) -> GuardedQueryable<T> {
        GuardedQueryable::new(self.inner.create_query(expression), self.lock.clone())
    }

    pub fn execute(&self, expression: &Expression<T>, terminal: Terminal) -> Result<Scalar<T>> {
        let _guard = self.lock.acquire(terminal.name())?;
        self.inner.execute(expression, terminal)
    }

    pub async fn execute_async(
        &self,
        expression: &Expression<T>,
        terminal: Terminal,
        cancel: &CancellationToken,
    ) -> Result<Scalar<T>> {
        let _guard = self.lock.acquire_async(terminal.name(), cancel).await?;
        self.inner.execute_async(expression, terminal, cancel).await
    }
}

#[async_trait]
impl<T: Entity> QueryProvider<T> for GuardedProvider<T> {
    fn create_query(&self, expression: Expression<T>) -> Arc<dyn Queryable<T>> {
        Arc::new(GuardedProvider::create_query(self, expression))
    }

    fn execute(&self, expression: &Expression<T>, terminal: Terminal) -> Result<Scalar<T>> {
        GuardedProvider::execute(self, expression, terminal)
    }

    async fn execute_async(
        &self,
        expression: &Expression<T>,
        terminal: Terminal,
        cancel: &CancellationToken,
    ) -> Result<Scalar<T>> {
        GuardedProvider::execute_async(self, expression, terminal, cancel).await
    }
}

/// A composed query whose execution is serialized on the context lock.
///
/// Immutable: every composition method returns a new queryable sharing the
/// same lock.
pub struct GuardedQueryable<T: Entity> {
    inner: Arc<dyn Queryable<T>>,
    lock: ContextLock,
}

impl<T: Entity> Clone for GuardedQueryable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lock: self.lock.clone(),
        }
    }
}

impl<T: Entity> std::fmt::Debug for GuardedQueryable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedQueryable")
            .field("expression", self.inner.expression())
            .field("context_id", &self.lock.context_id())
            .finish()
    }
}

impl<T: Entity> GuardedQueryable<T> {
    pub(crate) fn new(inner: Arc<dyn Queryable<T>>, lock: ContextLock) -> Self {
        Self { inner, lock }
    }

    pub fn expression(&self) -> &Expression<T> {
        self.inner.expression()
    }

    pub fn provider(&self) -> GuardedProvider<T> {
        GuardedProvider::new(self.inner.provider(), self.lock.clone())
    }

    fn compose(&self, f: impl FnOnce(Expression<T>) -> Expression<T>) -> Self {
        self.provider().create_query(f(self.expression().clone()))
    }

    // ------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------

    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.compose(|e| e.filter(predicate))
    }

    pub fn order_by<K: Ord + 'static>(&self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.compose(|e| e.order_by(key))
    }

    pub fn order_by_descending<K: Ord + 'static>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        self.compose(|e| e.order_by_descending(key))
    }

    pub fn then_by<K: Ord + 'static>(&self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.compose(|e| e.then_by(key))
    }

    pub fn then_by_descending<K: Ord + 'static>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        self.compose(|e| e.then_by_descending(key))
    }

    pub fn skip(&self, count: usize) -> Self {
        self.compose(|e| e.skip(count))
    }

    pub fn take(&self, count: usize) -> Self {
        self.compose(|e| e.take(count))
    }

    /// Related rows are loaded by the backend while the parent row is
    /// materialized, inside the same critical section as the advance.
    pub fn include<R: Entity>(
        &self,
        matches: impl Fn(&T, &R) -> bool + Send + Sync + 'static,
        assign: impl Fn(&mut T, Vec<R>) + Send + Sync + 'static,
    ) -> Self {
        self.compose(|e| e.include(matches, assign))
    }

    pub fn as_no_tracking(&self) -> Self {
        self.compose(Expression::as_no_tracking)
    }

    pub fn as_tracking(&self) -> Self {
        self.compose(Expression::as_tracking)
    }

    pub fn ignore_query_filters(&self) -> Self {
        self.compose(Expression::ignore_query_filters)
    }

    pub fn select<U>(&self, selector: impl Fn(&T) -> U + Send + Sync + 'static) -> GuardedProjection<T, U>
    where
        U: Send + 'static,
    {
        GuardedProjection {
            source: self.clone(),
            selector: Arc::new(selector),
        }
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Open a cursor. The lock covers opening only; each advance then takes
    /// it again on its own.
    pub fn cursor(&self) -> Result<GuardedCursor<T>> {
        let inner = {
            let _guard = self.lock.acquire("query.open")?;
            self.inner.cursor()?
        };
        Ok(GuardedCursor::new(inner, self.lock.clone()))
    }

    pub fn async_cursor(&self, cancel: CancellationToken) -> GuardedAsyncCursor<T> {
        GuardedAsyncCursor::new(self.inner.async_cursor(cancel.clone()), self.lock.clone(), cancel)
    }

    pub fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<T>> {
        self.async_cursor(cancel).into_stream()
    }

    pub fn to_list(&self) -> Result<Vec<T>> {
        self.cursor()?.collect()
    }

    pub async fn to_list_async(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        self.stream(cancel.clone()).try_collect().await
    }

    // ------------------------------------------------------------------
    // Scalar execution
    // ------------------------------------------------------------------

    pub fn count(&self) -> Result<usize> {
        self.provider().execute(self.expression(), Terminal::Count)?.into_count()
    }

    pub async fn count_async(&self, cancel: &CancellationToken) -> Result<usize> {
        self.execute_async(Terminal::Count, cancel).await?.into_count()
    }

    pub fn any(&self) -> Result<bool> {
        self.provider().execute(self.expression(), Terminal::Any)?.into_bool()
    }

    pub async fn any_async(&self, cancel: &CancellationToken) -> Result<bool> {
        self.execute_async(Terminal::Any, cancel).await?.into_bool()
    }

    pub fn first(&self) -> Result<T> {
        self.provider().execute(self.expression(), Terminal::First)?.into_element()?.ok_or_else(no_elements)
    }

    pub async fn first_async(&self, cancel: &CancellationToken) -> Result<T> {
        self.execute_async(Terminal::First, cancel).await?.into_element()?.ok_or_else(no_elements)
    }

    pub fn first_or_default(&self) -> Result<Option<T>> {
        self.provider().execute(self.expression(), Terminal::FirstOrDefault)?.into_element()
    }

    pub async fn first_or_default_async(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.execute_async(Terminal::FirstOrDefault, cancel).await?.into_element()
    }

    pub fn single(&self) -> Result<T> {
        self.provider().execute(self.expression(), Terminal::Single)?.into_element()?.ok_or_else(no_elements)
    }

    pub async fn single_async(&self, cancel: &CancellationToken) -> Result<T> {
        self.execute_async(Terminal::Single, cancel).await?.into_element()?.ok_or_else(no_elements)
    }

    pub fn single_or_default(&self) -> Result<Option<T>> {
        self.provider().execute(self.expression(), Terminal::SingleOrDefault)?.into_element()
    }

    pub async fn single_or_default_async(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.execute_async(Terminal::SingleOrDefault, cancel).await?.into_element()
    }

    async fn execute_async(&self, terminal: Terminal, cancel: &CancellationToken) -> Result<Scalar<T>> {
        self.provider().execute_async(self.expression(), terminal, cancel).await
    }
}

impl<T: Entity> Queryable<T> for GuardedQueryable<T> {
    fn expression(&self) -> &Expression<T> {
        GuardedQueryable::expression(self)
    }

    fn provider(&self) -> Arc<dyn QueryProvider<T>> {
        Arc::new(GuardedQueryable::provider(self))
    }

    fn cursor(&self) -> Result<Box<dyn Cursor<T>>> {
        Ok(Box::new(GuardedQueryable::cursor(self)?))
    }

    fn async_cursor(&self, cancel: CancellationToken) -> Box<dyn AsyncCursor<T>> {
        Box::new(GuardedQueryable::async_cursor(self, cancel))
    }
}

fn no_elements() -> Error {
    Error::InvalidOperation("Sequence contains no elements".into())
}

/// A guarded query followed by a projection applied to each element as it
/// is read.
pub struct GuardedProjection<T: Entity, U> {
    source: GuardedQueryable<T>,
    selector: Arc<dyn Fn(&T) -> U + Send + Sync>,
}

impl<T: Entity, U> Clone for GuardedProjection<T, U> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            selector: Arc::clone(&self.selector),
        }
    }
}

impl<T: Entity, U: Send + 'static> GuardedProjection<T, U> {
    pub fn source(&self) -> &GuardedQueryable<T> {
        &self.source
    }

    pub fn to_list(&self) -> Result<Vec<U>> {
        let selector = Arc::clone(&self.selector);
        self.source
            .cursor()?
            .map(|item| item.map(|entity| selector(&entity)))
            .collect()
    }

    pub async fn to_list_async(&self, cancel: &CancellationToken) -> Result<Vec<U>> {
        self.stream(cancel.clone()).try_collect().await
    }

    /// Projected elements, one locked advance each.
    pub fn cursor(&self) -> Result<Box<dyn Iterator<Item = Result<U>> + Send>> {
        let selector = Arc::clone(&self.selector);
        let cursor = self.source.cursor()?;
        Ok(Box::new(cursor.map(move |item| item.map(|entity| selector(&entity)))))
    }

    // Counting and existence do not depend on the projection.

    pub fn count(&self) -> Result<usize> {
        self.source.count()
    }

    pub async fn count_async(&self, cancel: &CancellationToken) -> Result<usize> {
        self.source.count_async(cancel).await
    }

    pub fn any(&self) -> Result<bool> {
        self.source.any()
    }

    pub async fn any_async(&self, cancel: &CancellationToken) -> Result<bool> {
        self.source.any_async(cancel).await
    }

    pub fn first(&self) -> Result<U> {
        Ok(self.project(self.source.first()?))
    }

    pub async fn first_async(&self, cancel: &CancellationToken) -> Result<U> {
        Ok(self.project(self.source.first_async(cancel).await?))
    }

    pub fn first_or_default(&self) -> Result<Option<U>> {
        Ok(self.source.first_or_default()?.map(|entity| self.project(entity)))
    }

    pub async fn first_or_default_async(&self, cancel: &CancellationToken) -> Result<Option<U>> {
        let first = self.source.first_or_default_async(cancel).await?;
        Ok(first.map(|entity| self.project(entity)))
    }

    pub fn single(&self) -> Result<U> {
        Ok(self.project(self.source.single()?))
    }

    pub async fn single_async(&self, cancel: &CancellationToken) -> Result<U> {
        Ok(self.project(self.source.single_async(cancel).await?))
    }

    pub fn single_or_default(&self) -> Result<Option<U>> {
        Ok(self.source.single_or_default()?.map(|entity| self.project(entity)))
    }

    pub async fn single_or_default_async(&self, cancel: &CancellationToken) -> Result<Option<U>> {
        let single = self.source.single_or_default_async(cancel).await?;
        Ok(single.map(|entity| self.project(entity)))
    }

    fn project(&self, entity: T) -> U {
        (self.selector)(&entity)
    }

    pub fn stream(&self, cancel: CancellationToken) -> BoxStream<'static, Result<U>> {
        let selector = Arc::clone(&self.selector);
        self.source
            .stream(cancel)
            .map(move |item| item.map(|entity| selector(&entity)))
            .boxed()
    }
}
