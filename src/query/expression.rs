// ============================================================================
// Query Expressions
// ============================================================================
//
// An `Expression<T>` is an immutable description of a query over one entity
// set. Composition methods consume the expression and return a new one;
// nothing here touches a context. Backends interpret the expression when a
// query is executed or enumerated.
//
// ============================================================================

use crate::core::{Entity, Error, Result};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A single composition step, applied in order.
pub enum QueryOp<T> {
    Filter(Predicate<T>),
    /// Stable sort by the comparators, first one primary.
    Sort(Vec<Comparator<T>>),
    Skip(usize),
    Take(usize),
}

impl<T> Clone for QueryOp<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Filter(predicate) => Self::Filter(Arc::clone(predicate)),
            Self::Sort(comparators) => Self::Sort(comparators.clone()),
            Self::Skip(count) => Self::Skip(*count),
            Self::Take(count) => Self::Take(*count),
        }
    }
}

impl<T> fmt::Debug for QueryOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(_) => write!(f, "Filter"),
            Self::Sort(comparators) => write!(f, "Sort({} keys)", comparators.len()),
            Self::Skip(count) => write!(f, "Skip({})", count),
            Self::Take(count) => write!(f, "Take({})", count),
        }
    }
}

/// Whether materialized entities are attached to the change tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tracking {
    #[default]
    TrackAll,
    NoTracking,
}

/// Rows of other entity sets, handed to include loaders by the backend.
///
/// `rows` returns a boxed `Vec<R>` for the set holding entities of type `R`.
pub trait RelatedRows {
    fn rows(&self, set: &str) -> Option<Box<dyn Any + Send>>;
}

type IncludeLoader<T> = Arc<dyn Fn(&mut T, &dyn RelatedRows) + Send + Sync>;

/// Eager loading of one navigation, executed while the parent row is
/// materialized.
pub struct Include<T> {
    related: &'static str,
    loader: IncludeLoader<T>,
}

impl<T> Include<T> {
    pub fn related(&self) -> &'static str {
        self.related
    }

    pub fn load(&self, parent: &mut T, source: &dyn RelatedRows) {
        (self.loader)(parent, source)
    }
}

impl<T> Clone for Include<T> {
    fn clone(&self) -> Self {
        Self {
            related: self.related,
            loader: Arc::clone(&self.loader),
        }
    }
}

/// Terminal operators that produce a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Count,
    Any,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
}

impl Terminal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Any => "any",
            Self::First => "first",
            Self::FirstOrDefault => "first_or_default",
            Self::Single => "single",
            Self::SingleOrDefault => "single_or_default",
        }
    }
}

/// Result of executing a `Terminal`
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar<T> {
    Count(usize),
    Bool(bool),
    Element(Option<T>),
}

impl<T> Scalar<T> {
    pub fn into_count(self) -> Result<usize> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(mismatch("count", &other)),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(mismatch("bool", &other)),
        }
    }

    pub fn into_element(self) -> Result<Option<T>> {
        match self {
            Self::Element(element) => Ok(element),
            other => Err(mismatch("element", &other)),
        }
    }
}

fn mismatch<T>(expected: &str, actual: &Scalar<T>) -> Error {
    let actual = match actual {
        Scalar::Count(_) => "count",
        Scalar::Bool(_) => "bool",
        Scalar::Element(_) => "element",
    };
    Error::InvalidOperation(format!("expected {} result, provider returned {}", expected, actual))
}

pub struct Expression<T> {
    source: Arc<str>,
    ops: Vec<QueryOp<T>>,
    includes: Vec<Include<T>>,
    tracking: Option<Tracking>,
    ignore_query_filters: bool,
}

impl<T> Clone for Expression<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ops: self.ops.clone(),
            includes: self.includes.clone(),
            tracking: self.tracking,
            ignore_query_filters: self.ignore_query_filters,
        }
    }
}

impl<T> fmt::Debug for Expression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("ops", &self.ops)
            .field("includes", &self.includes.iter().map(|i| i.related).collect::<Vec<_>>())
            .field("tracking", &self.tracking)
            .field("ignore_query_filters", &self.ignore_query_filters)
            .finish()
    }
}

impl<T: Entity> Expression<T> {
    /// Root expression: every row of `source`.
    pub fn root(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            ops: Vec::new(),
            includes: Vec::new(),
            tracking: None,
            ignore_query_filters: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ops(&self) -> &[QueryOp<T>] {
        &self.ops
    }

    pub fn includes(&self) -> &[Include<T>] {
        &self.includes
    }

    /// Explicit tracking override; `None` defers to the context default.
    pub fn tracking(&self) -> Option<Tracking> {
        self.tracking
    }

    pub fn ignores_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    pub fn is_root(&self) -> bool {
        self.ops.is_empty() && self.includes.is_empty()
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.ops.push(QueryOp::Filter(Arc::new(predicate)));
        self
    }

    pub fn order_by<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort(Arc::new(move |a: &T, b: &T| key(a).cmp(&key(b))), false)
    }

    pub fn order_by_descending<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort(Arc::new(move |a: &T, b: &T| key(b).cmp(&key(a))), false)
    }

    /// Secondary ordering. Without a preceding sort this starts one.
    pub fn then_by<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort(Arc::new(move |a: &T, b: &T| key(a).cmp(&key(b))), true)
    }

    pub fn then_by_descending<K: Ord + 'static>(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.sort(Arc::new(move |a: &T, b: &T| key(b).cmp(&key(a))), true)
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.ops.push(QueryOp::Skip(count));
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.ops.push(QueryOp::Take(count));
        self
    }

    /// Eagerly load related `R` rows into each materialized parent.
    pub fn include<R: Entity>(
        mut self,
        matches: impl Fn(&T, &R) -> bool + Send + Sync + 'static,
        assign: impl Fn(&mut T, Vec<R>) + Send + Sync + 'static,
    ) -> Self {
        let loader: IncludeLoader<T> = Arc::new(move |parent: &mut T, source: &dyn RelatedRows| {
            let rows = source
                .rows(R::NAME)
                .and_then(|boxed| boxed.downcast::<Vec<R>>().ok())
                .map(|rows| *rows)
                .unwrap_or_default();
            let related: Vec<R> = rows.into_iter().filter(|row| matches(parent, row)).collect();
            assign(parent, related);
        });
        self.includes.push(Include {
            related: R::NAME,
            loader,
        });
        self
    }

    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = Some(Tracking::NoTracking);
        self
    }

    pub fn as_tracking(mut self) -> Self {
        self.tracking = Some(Tracking::TrackAll);
        self
    }

    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_query_filters = true;
        self
    }

    fn sort(mut self, comparator: Comparator<T>, extend: bool) -> Self {
        if extend {
            if let Some(QueryOp::Sort(comparators)) = self.ops.last_mut() {
                comparators.push(comparator);
                return self;
            }
        }
        self.ops.push(QueryOp::Sort(vec![comparator]));
        self
    }
}

/// Order `a` and `b` by each comparator in turn.
pub fn compare_chain<T>(comparators: &[Comparator<T>], a: &T, b: &T) -> Ordering {
    comparators
        .iter()
        .map(|comparator| comparator(a, b))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
