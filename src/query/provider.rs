use super::expression::{Expression, Scalar, Terminal};
use crate::core::{Entity, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Forward-only cursor over query results
pub trait Cursor<T>: Send {
    /// Move to the next element. Returns false once exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// Element at the current position, if the last advance returned true.
    fn current(&self) -> Option<&T>;

    /// Whether `dispose` releases anything. Cursors that return false are
    /// not disposed under the context lock.
    fn holds_resources(&self) -> bool {
        false
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait AsyncCursor<T>: Send {
    async fn advance(&mut self) -> Result<bool>;

    fn current(&self) -> Option<&T>;

    fn holds_resources(&self) -> bool {
        false
    }

    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates and executes queries for one entity set
#[async_trait]
pub trait QueryProvider<T: Entity>: Send + Sync {
    /// Build a queryable for `expression` without executing anything.
    fn create_query(&self, expression: Expression<T>) -> Arc<dyn Queryable<T>>;

    fn execute(&self, expression: &Expression<T>, terminal: Terminal) -> Result<Scalar<T>>;

    async fn execute_async(
        &self,
        expression: &Expression<T>,
        terminal: Terminal,
        cancel: &CancellationToken,
    ) -> Result<Scalar<T>>;
}

/// A composed, not yet executed query
pub trait Queryable<T: Entity>: Send + Sync {
    fn expression(&self) -> &Expression<T>;

    fn provider(&self) -> Arc<dyn QueryProvider<T>>;

    /// Open a cursor. Backends may defer all work to the first advance.
    fn cursor(&self) -> Result<Box<dyn Cursor<T>>>;

    fn async_cursor(&self, cancel: CancellationToken) -> Box<dyn AsyncCursor<T>>;
}
