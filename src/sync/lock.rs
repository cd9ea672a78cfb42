// ============================================================================
// Context Lock
// ============================================================================
//
// A binary semaphore owned by one guarded context and shared by reference
// with every wrapper it produces. Ownership of the single permit is
// represented by a `LockGuard`; dropping the guard releases the permit, so
// release happens exactly once on every exit path.
//
// The lock is NOT re-entrant. A guarded operation that calls back into the
// same context while holding the guard waits forever.
//
// ============================================================================

use crate::core::{ContextId, Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ContextLock {
    semaphore: Arc<Semaphore>,
    context_id: ContextId,
}

impl ContextLock {
    pub fn new(context_id: ContextId) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            context_id,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Block the calling thread until the permit is available.
    ///
    /// Fails with `ObjectDisposed` once the lock has been disposed, including
    /// for callers that were already waiting.
    pub fn acquire(&self, operation: &'static str) -> Result<LockGuard> {
        let permit = futures::executor::block_on(Arc::clone(&self.semaphore).acquire_owned())
            .map_err(|_| self.disposed_error())?;
        Ok(self.grant(permit, operation))
    }

    /// Suspend the calling task until the permit is available or `cancel`
    /// fires.
    ///
    /// A token that is already cancelled fails immediately even when the
    /// lock is free. On cancellation no permit is held afterwards.
    pub async fn acquire_async(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
    ) -> Result<LockGuard> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::trace!(context_id = %self.context_id, operation, "context lock wait cancelled");
                return Err(Error::Cancelled);
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| self.disposed_error())?
            }
        };
        Ok(self.grant(permit, operation))
    }

    /// Take the permit only if nobody holds it.
    pub fn try_acquire(&self, operation: &'static str) -> Result<LockGuard> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(self.grant(permit, operation)),
            Err(TryAcquireError::NoPermits) => Err(Error::LockBusy),
            Err(TryAcquireError::Closed) => Err(self.disposed_error()),
        }
    }

    /// Run `f` inside the critical section.
    pub fn with_lock<R>(&self, operation: &'static str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let _guard = self.acquire(operation)?;
        f()
    }

    /// Run the future produced by `f` inside the critical section.
    ///
    /// `f` is only called once the permit is held, so a cancelled wait never
    /// starts the underlying operation.
    pub async fn with_lock_async<R, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let _guard = self.acquire_async(operation, cancel).await?;
        f().await
    }

    /// Close the semaphore. Every later or pending acquire fails with
    /// `ObjectDisposed`; a guard that is currently held stays valid.
    pub fn dispose(&self) {
        if !self.semaphore.is_closed() {
            tracing::debug!(context_id = %self.context_id, "context lock disposed");
        }
        self.semaphore.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    fn grant(&self, permit: OwnedSemaphorePermit, operation: &'static str) -> LockGuard {
        tracing::trace!(context_id = %self.context_id, operation, "context lock acquired");
        LockGuard {
            permit: Some(permit),
            semaphore: Arc::clone(&self.semaphore),
            context_id: self.context_id,
            operation,
        }
    }

    fn disposed_error(&self) -> Error {
        Error::ObjectDisposed(format!("context lock {}", self.context_id))
    }
}

impl std::fmt::Debug for ContextLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLock")
            .field("context_id", &self.context_id)
            .field("held", &self.is_held())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Proof of ownership of the context lock. Releases on drop.
#[must_use = "the context lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    context_id: ContextId,
    operation: &'static str,
}

impl LockGuard {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Release explicitly. Consumes the guard, so a second release of the
    /// same acquisition cannot be expressed.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // A free permit while this guard exists means someone released a
        // permit they never acquired.
        if self.semaphore.available_permits() != 0 && !std::thread::panicking() {
            panic!(
                "context lock {} released while not held (operation: {})",
                self.context_id, self.operation
            );
        }
        drop(self.permit.take());
        tracing::trace!(context_id = %self.context_id, operation = self.operation, "context lock released");
    }
}
