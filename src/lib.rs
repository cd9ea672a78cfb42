// ============================================================================
// guardctx Library
// ============================================================================

//! Share one persistence context between concurrent callers.
//!
//! An ORM context is a unit of work: a change tracker, cached entities and
//! an open connection, built to serve one operation at a time. Starting a
//! second operation while one is running fails or corrupts the tracker.
//! [`GuardedContext`] wraps any [`PersistenceContext`] and serializes every
//! call that touches the context's state on a single async-aware lock, while
//! query composition stays lock-free.
//!
//! # Examples
//!
//! ```
//! use guardctx::prelude::*;
//! use guardctx::memory::{MemoryContext, MemoryStore};
//!
//! #[derive(Debug, Clone, Entity)]
//! struct Product {
//!     id: u32,
//!     name: String,
//! }
//!
//! # fn main() -> guardctx::Result<()> {
//! let store = MemoryStore::new();
//! store.register::<Product>()?;
//!
//! let context = GuardedContext::new(MemoryContext::new(store));
//! context.add(Product { id: 1, name: "Tea".into() })?;
//! context.save_changes(true)?;
//!
//! let names = context
//!     .set::<Product>()?
//!     .as_queryable()
//!     .select(|p| p.name.clone())
//!     .to_list()?;
//! assert_eq!(names, vec!["Tea".to_string()]);
//! # Ok(())
//! # }
//! ```

extern crate self as guardctx;

pub mod backend;
pub mod core;
pub mod guard;
pub mod memory;
pub mod prelude;
pub mod query;
pub mod sync;

pub use backend::{EntitySet, PersistenceContext};
pub use crate::core::{ContextId, Entity, EntityEntry, EntityState, Error, Result};
pub use guard::{
    GuardedAsyncCursor, GuardedContext, GuardedCursor, GuardedProjection, GuardedProvider,
    GuardedQueryable, GuardedSet,
};
pub use query::{Expression, Queryable, QueryProvider, Tracking};
pub use sync::{CancellationToken, ContextLock, LockGuard};

pub use guardctx_derive::Entity;
