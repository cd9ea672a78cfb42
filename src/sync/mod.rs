pub mod lock;

pub use lock::{ContextLock, LockGuard};
pub use tokio_util::sync::CancellationToken;
