// ============================================================================
// In-Memory Query Execution
// ============================================================================
//
// Queries run against a snapshot of the set taken when the query executes.
// Pipeline: snapshot -> global query filter -> composed ops in order. Rows
// leaving the pipeline are materialized one at a time: identity resolution
// against the change tracker, then includes.
//
// Cursors defer everything to the first advance, and every advance and the
// final dispose is a backend command of its own.
//
// ============================================================================

use super::context::ContextInner;
use super::detector::Command;
use super::store::TableView;
use crate::core::{Entity, Error, Result};
use crate::query::{
    AsyncCursor, Cursor, Expression, QueryOp, QueryProvider, Queryable, Scalar, Terminal, Tracking,
    compare_chain,
};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Apply composed operators in order.
fn apply_ops<T>(mut rows: Vec<T>, ops: &[QueryOp<T>]) -> Vec<T> {
    for op in ops {
        match op {
            QueryOp::Filter(predicate) => rows.retain(|row| predicate(row)),
            QueryOp::Sort(comparators) => rows.sort_by(|a, b| compare_chain(comparators, a, b)),
            QueryOp::Skip(count) => {
                rows.drain(..(*count).min(rows.len()));
            }
            QueryOp::Take(count) => rows.truncate(*count),
        }
    }
    rows
}

impl ContextInner {
    /// Rows selected by `expression`, not yet materialized.
    pub(super) fn select<T: Entity>(&self, expression: &Expression<T>) -> Result<Vec<T>> {
        let snapshot = self.store.snapshot::<T>(expression.source())?;
        let mut rows: Vec<T> = snapshot.values().cloned().collect();

        if !expression.ignores_query_filters()
            && let Some(filter) = self.query_filter::<T>()
        {
            rows.retain(|row| filter(row));
        }

        Ok(apply_ops(rows, expression.ops()))
    }

    /// Identity resolution and eager loading for one selected row.
    pub(super) fn materialize<T: Entity>(&self, expression: &Expression<T>, row: T) -> Result<T> {
        let mut row = match self.tracking_of(expression.tracking()) {
            Tracking::TrackAll => self.track::<T, _>(expression.source(), |set| Ok(set.resolve(row)))?,
            Tracking::NoTracking => row,
        };

        if !expression.includes().is_empty() {
            self.store.read(|tables| {
                let view = TableView::new(tables);
                for include in expression.includes() {
                    include.load(&mut row, &view);
                }
            })?;
        }
        Ok(row)
    }

    pub(super) fn execute_terminal<T: Entity>(
        &self,
        expression: &Expression<T>,
        terminal: Terminal,
    ) -> Result<Scalar<T>> {
        let rows = self.select(expression)?;
        let scalar = match terminal {
            Terminal::Count => Scalar::Count(rows.len()),
            Terminal::Any => Scalar::Bool(!rows.is_empty()),
            Terminal::First | Terminal::FirstOrDefault => {
                let first = rows.into_iter().next();
                Scalar::Element(first.map(|row| self.materialize(expression, row)).transpose()?)
            }
            Terminal::Single | Terminal::SingleOrDefault => {
                if rows.len() > 1 {
                    return Err(Error::InvalidOperation("Sequence contains more than one element".into()));
                }
                let single = rows.into_iter().next();
                Scalar::Element(single.map(|row| self.materialize(expression, row)).transpose()?)
            }
        };
        Ok(scalar)
    }
}

/// Query provider of one memory context
pub struct MemoryProvider<T: Entity> {
    inner: Arc<ContextInner>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> MemoryProvider<T> {
    pub(crate) fn new(inner: Arc<ContextInner>) -> Self {
        Self {
            inner,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity> QueryProvider<T> for MemoryProvider<T> {
    fn create_query(&self, expression: Expression<T>) -> Arc<dyn Queryable<T>> {
        Arc::new(MemoryQueryable::new(Arc::clone(&self.inner), expression))
    }

    fn execute(&self, expression: &Expression<T>, terminal: Terminal) -> Result<Scalar<T>> {
        let command = Command::Execute {
            set: expression.source().to_string(),
            terminal: terminal.name(),
        };
        self.inner
            .run(command, |inner| inner.execute_terminal(expression, terminal))
    }

    async fn execute_async(
        &self,
        expression: &Expression<T>,
        terminal: Terminal,
        cancel: &CancellationToken,
    ) -> Result<Scalar<T>> {
        let command = Command::Execute {
            set: expression.source().to_string(),
            terminal: terminal.name(),
        };
        self.inner
            .run_async(command, cancel, |inner| inner.execute_terminal(expression, terminal))
            .await
    }
}

/// A composed query over one memory context. Creating it runs nothing.
pub struct MemoryQueryable<T: Entity> {
    inner: Arc<ContextInner>,
    expression: Expression<T>,
}

impl<T: Entity> MemoryQueryable<T> {
    pub(crate) fn new(inner: Arc<ContextInner>, expression: Expression<T>) -> Self {
        Self { inner, expression }
    }
}

impl<T: Entity> Queryable<T> for MemoryQueryable<T> {
    fn expression(&self) -> &Expression<T> {
        &self.expression
    }

    fn provider(&self) -> Arc<dyn QueryProvider<T>> {
        Arc::new(MemoryProvider::new(Arc::clone(&self.inner)))
    }

    fn cursor(&self) -> Result<Box<dyn Cursor<T>>> {
        Ok(Box::new(MemoryCursor::new(
            Arc::clone(&self.inner),
            self.expression.clone(),
            CancellationToken::new(),
        )))
    }

    fn async_cursor(&self, cancel: CancellationToken) -> Box<dyn AsyncCursor<T>> {
        Box::new(MemoryCursor::new(
            Arc::clone(&self.inner),
            self.expression.clone(),
            cancel,
        ))
    }
}

enum CursorState<T> {
    /// Query not run yet
    Pending,
    Open(std::vec::IntoIter<T>),
    Closed,
}

/// Cursor over a memory query, usable both blocking and async.
///
/// Each advance, and the dispose of an open cursor, is a separate command.
/// On a raw context a step that overlaps any other command trips the
/// concurrency check.
pub struct MemoryCursor<T: Entity> {
    inner: Arc<ContextInner>,
    expression: Expression<T>,
    cancel: CancellationToken,
    state: CursorState<T>,
    current: Option<T>,
}

impl<T: Entity> MemoryCursor<T> {
    fn new(inner: Arc<ContextInner>, expression: Expression<T>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            expression,
            cancel,
            state: CursorState::Pending,
            current: None,
        }
    }

    fn advance_command(&self) -> Command {
        let set = self.expression.source().to_string();
        match self.state {
            CursorState::Pending => Command::Query { set },
            _ => Command::Fetch { set },
        }
    }

    fn step(&mut self) -> Result<bool> {
        if let CursorState::Pending = self.state {
            let rows = self.inner.select(&self.expression)?;
            self.state = CursorState::Open(rows.into_iter());
        }

        let next = match &mut self.state {
            CursorState::Open(rows) => rows.next(),
            CursorState::Pending | CursorState::Closed => {
                return Err(Error::ObjectDisposed("cursor".into()));
            }
        };

        self.current = match next {
            Some(row) => Some(self.inner.materialize(&self.expression, row)?),
            None => {
                self.state = CursorState::Closed;
                None
            }
        };
        Ok(self.current.is_some())
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
        self.current = None;
    }

    fn close_command(&self) -> Command {
        Command::Close {
            set: self.expression.source().to_string(),
        }
    }
}

impl<T: Entity> Cursor<T> for MemoryCursor<T> {
    fn advance(&mut self) -> Result<bool> {
        if matches!(self.state, CursorState::Closed) {
            self.current = None;
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        inner.run(self.advance_command(), |_| self.step())
    }

    fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    fn holds_resources(&self) -> bool {
        matches!(self.state, CursorState::Open(_))
    }

    fn dispose(&mut self) -> Result<()> {
        if !matches!(self.state, CursorState::Open(_)) {
            self.close();
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        inner.run(self.close_command(), |_| {
            self.close();
            Ok(())
        })
    }
}

#[async_trait]
impl<T: Entity> AsyncCursor<T> for MemoryCursor<T> {
    async fn advance(&mut self) -> Result<bool> {
        if matches!(self.state, CursorState::Closed) {
            self.current = None;
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let command = self.advance_command();
        inner.run_async(command, &cancel, |_| self.step()).await
    }

    fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    fn holds_resources(&self) -> bool {
        matches!(self.state, CursorState::Open(_))
    }

    async fn dispose(&mut self) -> Result<()> {
        if !matches!(self.state, CursorState::Open(_)) {
            self.close();
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let command = self.close_command();
        inner
            .run_async(command, &CancellationToken::new(), |_| {
                self.close();
                Ok(())
            })
            .await
    }
}
