// ============================================================================
// Query Module
// ============================================================================
//
// The composable query surface shared by backends and guarded wrappers:
// expressions describe a query, providers execute them, cursors walk the
// results.
//
// ============================================================================

pub mod expression;
pub mod provider;

pub use expression::{
    Comparator, Expression, Include, Predicate, QueryOp, RelatedRows, Scalar, Terminal, Tracking,
    compare_chain,
};
pub use provider::{AsyncCursor, Cursor, QueryProvider, Queryable};
