use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Cannot access a disposed object: {0}")]
    ObjectDisposed(String),

    #[error("Context lock is held by another operation")]
    LockBusy,

    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    #[error("Duplicate key {key} in entity set '{entity}'")]
    DuplicateKey { entity: String, key: String },

    #[error("Entity {key} in set '{entity}' was expected to exist but was not found")]
    StaleEntity { entity: String, key: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entity set '{0}' not found")]
    EntitySetNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Command rejected by interceptor: {0}")]
    Interceptor(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl Error {
    /// True for failures raised by the lock itself rather than the backend.
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ObjectDisposed(_) | Self::LockBusy)
    }
}
