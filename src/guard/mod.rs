// ============================================================================
// Guarded Wrappers
// ============================================================================
//
// Decorators over a persistence backend that serialize every state-touching
// call on one context lock:
//
//   GuardedContext ──set()──▶ GuardedSet ──as_queryable()──▶ GuardedQueryable
//        │                        │                              │
//   save / find / dispose    add / attach / update /       compose (lock-free)
//                            remove / find / local         execute / enumerate
//                                                                │
//                                                   GuardedCursor / GuardedAsyncCursor
//
// All wrappers produced for one context share that context's lock.
//
// ============================================================================

pub mod context;
pub mod cursor;
pub mod queryable;
pub mod set;

pub use context::GuardedContext;
pub use cursor::{GuardedAsyncCursor, GuardedCursor};
pub use queryable::{GuardedProjection, GuardedProvider, GuardedQueryable};
pub use set::GuardedSet;
