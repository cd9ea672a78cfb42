// ============================================================================
// Guarded Cursors
// ============================================================================
//
// Every advance and dispose runs in its own critical section. The lock is
// never held between two advances, so the caller may use the same context
// while walking the results.
//
// ============================================================================

use crate::core::{Entity, Error, Result};
use crate::query::{AsyncCursor, Cursor};
use crate::sync::ContextLock;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

pub struct GuardedCursor<T> {
    inner: Box<dyn Cursor<T>>,
    lock: ContextLock,
    disposed: bool,
}

impl<T: Entity> GuardedCursor<T> {
    pub(crate) fn new(inner: Box<dyn Cursor<T>>, lock: ContextLock) -> Self {
        Self {
            inner,
            lock,
            disposed: false,
        }
    }

    pub fn advance(&mut self) -> Result<bool> {
        if self.disposed {
            return Err(Error::ObjectDisposed("cursor".into()));
        }
        let _guard = self.lock.acquire("cursor.advance")?;
        self.inner.advance()
    }

    /// Already materialized; reading it takes no lock.
    pub fn current(&self) -> Option<&T> {
        self.inner.current()
    }

    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        if !self.inner.holds_resources() {
            return Ok(());
        }
        let _guard = self.lock.acquire("cursor.dispose")?;
        self.inner.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl<T: Entity> Iterator for GuardedCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.disposed {
            return None;
        }
        match self.advance() {
            Ok(true) => Some(current_cloned(self.inner.current())),
            Ok(false) => self.dispose().err().map(Err),
            Err(err) => {
                if let Err(dispose_err) = self.dispose() {
                    tracing::warn!(error = %dispose_err, "cursor dispose failed after advance error");
                }
                Some(Err(err))
            }
        }
    }
}

impl<T: Entity> Cursor<T> for GuardedCursor<T> {
    fn advance(&mut self) -> Result<bool> {
        GuardedCursor::advance(self)
    }

    fn current(&self) -> Option<&T> {
        GuardedCursor::current(self)
    }

    fn holds_resources(&self) -> bool {
        !self.disposed && self.inner.holds_resources()
    }

    fn dispose(&mut self) -> Result<()> {
        GuardedCursor::dispose(self)
    }
}

impl<T> Drop for GuardedCursor<T> {
    fn drop(&mut self) {
        if self.disposed || !self.inner.holds_resources() {
            return;
        }
        // Drop must not block: dispose only if the lock is free right now.
        match self.lock.try_acquire("cursor.drop") {
            Ok(_guard) => {
                if let Err(err) = self.inner.dispose() {
                    tracing::warn!(error = %err, "cursor dispose failed during drop");
                }
            }
            Err(err) => {
                tracing::warn!(
                    context_id = %self.lock.context_id(),
                    error = %err,
                    "cursor dropped without dispose while the context lock was unavailable"
                );
            }
        }
    }
}

pub struct GuardedAsyncCursor<T> {
    inner: Box<dyn AsyncCursor<T>>,
    lock: ContextLock,
    cancel: CancellationToken,
    disposed: bool,
}

impl<T: Entity> GuardedAsyncCursor<T> {
    pub(crate) fn new(inner: Box<dyn AsyncCursor<T>>, lock: ContextLock, cancel: CancellationToken) -> Self {
        Self {
            inner,
            lock,
            cancel,
            disposed: false,
        }
    }

    pub async fn advance(&mut self) -> Result<bool> {
        if self.disposed {
            return Err(Error::ObjectDisposed("cursor".into()));
        }
        let _guard = self.lock.acquire_async("cursor.advance_async", &self.cancel).await?;
        self.inner.advance().await
    }

    pub fn current(&self) -> Option<&T> {
        self.inner.current()
    }

    /// Disposal is not cancellable: it waits for the lock even when the
    /// enumeration token has fired.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        if !self.inner.holds_resources() {
            return Ok(());
        }
        let _guard = self
            .lock
            .acquire_async("cursor.dispose_async", &CancellationToken::new())
            .await?;
        self.inner.dispose().await
    }

    /// Stream of the remaining elements. Ends after the first error; the
    /// cursor is disposed under the lock on exhaustion and on error.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            let advanced = match cursor.advance().await {
                Ok(true) => current_cloned(cursor.current()).map(Some),
                Ok(false) => Ok(None),
                Err(err) => Err(err),
            };
            match advanced {
                Ok(Some(item)) => Ok(Some((item, cursor))),
                Ok(None) => {
                    cursor.dispose().await?;
                    Ok(None)
                }
                Err(err) => {
                    if let Err(dispose_err) = cursor.dispose().await {
                        tracing::warn!(error = %dispose_err, "cursor dispose failed after advance error");
                    }
                    Err(err)
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl<T: Entity> AsyncCursor<T> for GuardedAsyncCursor<T> {
    async fn advance(&mut self) -> Result<bool> {
        GuardedAsyncCursor::advance(self).await
    }

    fn current(&self) -> Option<&T> {
        GuardedAsyncCursor::current(self)
    }

    fn holds_resources(&self) -> bool {
        !self.disposed && self.inner.holds_resources()
    }

    async fn dispose(&mut self) -> Result<()> {
        GuardedAsyncCursor::dispose(self).await
    }
}

impl<T> Drop for GuardedAsyncCursor<T> {
    fn drop(&mut self) {
        if !self.disposed && self.inner.holds_resources() {
            tracing::warn!(
                context_id = %self.lock.context_id(),
                "async cursor dropped without dispose; call dispose().await to release it under the context lock"
            );
        }
    }
}

fn current_cloned<T: Clone>(current: Option<&T>) -> Result<T> {
    current
        .cloned()
        .ok_or_else(|| Error::InvalidOperation("cursor advanced without a current element".into()))
}
