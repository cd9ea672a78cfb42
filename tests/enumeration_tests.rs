/// Enumeration tests
///
/// Cursors and streams take the lock per step, so the same context stays
/// usable between steps and concurrent enumerations interleave.
/// Run with: cargo test --test enumeration_tests

mod common;

use common::*;
use futures::StreamExt;
use guardctx::memory::{Command, MemoryContext};
use guardctx::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_lock_is_free_between_advances() {
    let store = seeded_store();
    let context = guarded(&store);
    let mut cursor = context
        .set::<Product>()
        .unwrap()
        .as_queryable()
        .order_by(|p| p.id)
        .cursor()
        .unwrap();

    let mut visited = Vec::new();
    while cursor.advance().unwrap() {
        assert!(!context.lock().is_held());
        let id = cursor.current().unwrap().id;

        // Other calls on the same context work between steps.
        let found = context.find::<Product>(&id).unwrap().unwrap();
        assert_eq!(found.id, id);
        visited.push(id);
    }
    cursor.dispose().unwrap();

    assert_eq!(visited, vec![1, 2, 3]);
}

#[test]
fn test_cursor_as_iterator() {
    let store = seeded_store();
    let context = guarded(&store);
    let cursor = context
        .set::<Product>()
        .unwrap()
        .as_queryable()
        .ignore_query_filters()
        .cursor()
        .unwrap();

    let all: Vec<Product> = cursor.collect::<guardctx::Result<_>>().unwrap();
    assert_eq!(all.len(), 4);
    assert!(!context.lock().is_held());
}

#[test]
fn test_writes_between_steps() -> anyhow::Result<()> {
    let store = seeded_store();
    let context = guarded(&store);
    let products = context.set::<Product>()?;

    for item in products.as_queryable().order_by(|p| p.id).cursor()? {
        let mut item = item?;
        item.price += 1;
        products.update(item)?;
    }
    assert_eq!(context.save_changes(true)?, 3);

    let prices = products
        .as_queryable()
        .order_by(|p| p.id)
        .select(|p| p.price)
        .to_list()?;
    assert_eq!(prices, vec![41, 26, 181]);
    Ok(())
}

#[test]
fn test_dispose_of_open_cursor_reaches_backend() {
    let store = seeded_store();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let inner = MemoryContext::builder(store)
        .interceptor(move |command: &Command| {
            if matches!(command, Command::Close { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .build()
        .unwrap();
    let context = GuardedContext::new(inner);
    let query = context.set::<Product>().unwrap().as_queryable();

    let mut cursor = query.cursor().unwrap();
    assert!(cursor.advance().unwrap());
    cursor.dispose().unwrap();
    cursor.dispose().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(matches!(cursor.advance(), Err(Error::ObjectDisposed(_))));

    // Dropping an open cursor disposes it when the lock is free.
    let mut dropped = query.cursor().unwrap();
    assert!(dropped.advance().unwrap());
    drop(dropped);
    assert_eq!(closes.load(Ordering::SeqCst), 2);

    // An exhausted cursor has nothing left to release.
    let exhausted: Vec<Product> = query.cursor().unwrap().map(|p| p.unwrap()).collect();
    assert_eq!(exhausted.len(), 4);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stream_with_lookups_between_items() {
    let store = seeded_store();
    let context = guarded(&store);
    let cancel = CancellationToken::new();
    let mut stream = context
        .set::<Product>()
        .unwrap()
        .as_queryable()
        .include::<Dependency>(|p, d| d.product_id == p.id, |p, deps| p.dependencies = deps)
        .order_by(|p| p.id)
        .stream(cancel.clone());

    let mut dependency_counts = Vec::new();
    while let Some(item) = stream.next().await {
        let item = item.unwrap();
        assert!(context.find_async::<Product>(&item.id, &cancel).await.unwrap().is_some());
        dependency_counts.push(item.dependencies.len());
    }

    assert_eq!(dependency_counts, vec![0, 1, 0]);
}

#[tokio::test]
async fn test_cancelled_stream_stops() {
    let store = seeded_store();
    let context = guarded(&store);
    let cancel = CancellationToken::new();
    let mut stream = context
        .set::<Product>()
        .unwrap()
        .as_queryable()
        .stream(cancel.clone());

    assert!(stream.next().await.unwrap().is_ok());
    cancel.cancel();

    assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
    assert!(stream.next().await.is_none());
    assert!(!context.lock().is_held());
}

#[tokio::test]
async fn test_cancelled_stream_releases_backend_cursor() {
    let store = seeded_store();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let inner = MemoryContext::builder(store)
        .interceptor(move |command: &Command| {
            if matches!(command, Command::Close { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .build()
        .unwrap();
    let context = GuardedContext::new(inner);
    let cancel = CancellationToken::new();
    let mut stream = context
        .set::<Product>()
        .unwrap()
        .as_queryable()
        .stream(cancel.clone());

    assert!(stream.next().await.unwrap().is_ok());
    cancel.cancel();

    assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
    assert!(stream.next().await.is_none());
    drop(stream);

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!context.lock().is_held());
}

#[tokio::test]
async fn test_async_cursor_steps() {
    let store = seeded_store();
    let context = guarded(&store);
    let mut cursor = context
        .set::<Product>()
        .unwrap()
        .as_async_enumerable()
        .order_by_descending(|p| p.id)
        .async_cursor(CancellationToken::new());

    let mut ids = Vec::new();
    while cursor.advance().await.unwrap() {
        assert!(!context.lock().is_held());
        ids.push(cursor.current().unwrap().id);
    }
    cursor.dispose().await.unwrap();

    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_streams_interleave() {
    for &level in &CONCURRENCY_LEVELS {
        let store = seeded_store();
        let context = guarded_contended(&store);
        let products = Arc::new(context.set::<Product>().unwrap());

        let handles: Vec<_> = (0..level)
            .map(|_| {
                let products = Arc::clone(&products);
                tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    let names: Vec<String> = products
                        .as_queryable()
                        .order_by(|p| p.id)
                        .select(|p| p.name.clone())
                        .stream(cancel)
                        .map(|name| name.unwrap())
                        .collect()
                        .await;
                    names
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), vec!["Keyboard", "Mouse", "Monitor"]);
        }
    }
}

#[test]
fn test_concurrent_cursors_on_threads() {
    for &level in &CONCURRENCY_LEVELS {
        let store = seeded_store();
        let context = guarded_contended(&store);
        let query = context.set::<Product>().unwrap().as_queryable();

        let handles: Vec<_> = (0..level)
            .map(|_| {
                let query = query.clone();
                std::thread::spawn(move || {
                    let mut cursor = query.cursor()?;
                    let mut total = 0;
                    while cursor.advance()? {
                        total += cursor.current().map_or(0, |p| p.price);
                    }
                    cursor.dispose()?;
                    Ok::<_, Error>(total)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 245);
        }
    }
}
