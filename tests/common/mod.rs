//! Shared fixtures for integration tests.
//!
//! The seeded store holds four products. The one with an empty name is
//! hidden by the product query filter, so filtered queries see three.

#![allow(dead_code)]

use guardctx::memory::{Command, ContextOptions, MemoryContext, MemoryStore};
use guardctx::{Entity, GuardedContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Concurrency levels every contention test runs at
pub const CONCURRENCY_LEVELS: [usize; 3] = [10, 20, 50];

#[derive(Debug, Clone, PartialEq, Entity)]
pub struct Product {
    #[key]
    pub id: u32,
    pub name: String,
    pub price: u32,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Entity)]
pub struct Dependency {
    pub id: u32,
    pub product_id: u32,
    pub name: String,
}

pub fn product(id: u32, name: &str, price: u32) -> Product {
    Product {
        id,
        name: name.to_string(),
        price,
        dependencies: Vec::new(),
    }
}

pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .seed(vec![
            product(1, "Keyboard", 40),
            product(2, "Mouse", 25),
            product(3, "Monitor", 180),
            product(4, "", 0),
        ])
        .unwrap();
    store
        .seed(vec![Dependency {
            id: 100,
            product_id: 2,
            name: "Battery".to_string(),
        }])
        .unwrap();
    store
}

/// Options with a small per-command latency so overlapping commands on a
/// raw context collide reliably.
pub fn contended_options() -> ContextOptions {
    ContextOptions::new("shop").command_latency(Duration::from_millis(1))
}

pub fn memory_context(store: &MemoryStore, options: ContextOptions) -> MemoryContext {
    MemoryContext::builder(store.clone())
        .options(options)
        .query_filter::<Product>(|p| !p.name.is_empty())
        .build()
        .unwrap()
}

pub fn guarded(store: &MemoryStore) -> GuardedContext<MemoryContext> {
    GuardedContext::new(memory_context(store, ContextOptions::new("shop")))
}

pub fn guarded_contended(store: &MemoryStore) -> Arc<GuardedContext<MemoryContext>> {
    Arc::new(GuardedContext::new(memory_context(store, contended_options())))
}

/// Counts the backend commands that run a query.
#[derive(Clone, Default)]
pub struct QueryCounter {
    count: Arc<AtomicUsize>,
}

impl QueryCounter {
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn context(&self, store: &MemoryStore) -> GuardedContext<MemoryContext> {
        let count = Arc::clone(&self.count);
        let inner = MemoryContext::builder(store.clone())
            .query_filter::<Product>(|p| !p.name.is_empty())
            .interceptor(move |command: &Command| {
                if matches!(command, Command::Query { .. } | Command::Execute { .. }) {
                    count.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .build()
            .unwrap();
        GuardedContext::new(inner)
    }
}

pub fn ids(products: &[Product]) -> Vec<u32> {
    products.iter().map(|p| p.id).collect()
}
