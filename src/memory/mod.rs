// ============================================================================
// In-Memory Backend
// ============================================================================
//
// A persistence backend with the usual ORM context semantics: a change
// tracker with identity resolution, global query filters, includes, and
// a concurrency detector that rejects overlapping operations instead of
// serializing them.
//
//   MemoryStore (shared rows)  <──save──  MemoryContext (tracker, detector)
//                                             │
//                                        MemorySet ──▶ MemoryQueryable ──▶ MemoryCursor
//
// ============================================================================

pub mod config;
mod context;
mod detector;
mod query;
mod set;
mod store;
mod tracker;

pub use config::ContextOptions;
pub use context::{MemoryContext, MemoryContextBuilder};
pub use detector::{Command, Interceptor};
pub use query::{MemoryCursor, MemoryProvider, MemoryQueryable};
pub use set::MemorySet;
pub use store::MemoryStore;
