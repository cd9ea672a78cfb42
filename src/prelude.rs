//! Common imports for application code.
//!
//! Brings the backend traits into scope, so trait methods such as
//! `save_changes`, `find` and `set` resolve on guarded contexts.

pub use crate::backend::{EntitySet, PersistenceContext};
pub use crate::core::{Entity, EntityEntry, EntityState, Error, Result};
pub use crate::guard::{GuardedContext, GuardedQueryable, GuardedSet};
pub use crate::query::Tracking;
pub use crate::sync::CancellationToken;

pub use guardctx_derive::Entity;
