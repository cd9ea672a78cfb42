/// Guarded context tests
///
/// Single-caller behaviour of the guarded wrappers: results and errors pass
/// through unchanged, disposal and cancellation behave like the lock says.
/// Run with: cargo test --test guarded_context_tests

mod common;

use common::*;
use futures::FutureExt;
use guardctx::memory::{Command, ContextOptions, MemoryContext, MemoryStore};
use guardctx::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_find_returns_tracked_entity() {
    let store = seeded_store();
    let context = guarded(&store);

    let mouse = context.find::<Product>(&2).unwrap().unwrap();
    assert_eq!(mouse.name, "Mouse");
    assert_eq!(context.entry(&mouse).unwrap().state(), EntityState::Unchanged);

    assert!(context.find::<Product>(&999).unwrap().is_none());
}

#[test]
fn test_update_and_save_persist_through_the_store() {
    let store = seeded_store();
    let context = guarded(&store);

    let mut monitor = context.find::<Product>(&3).unwrap().unwrap();
    monitor.price = 150;
    assert_eq!(context.update(monitor).unwrap().state(), EntityState::Modified);
    assert_eq!(context.save_changes(true).unwrap(), 1);

    let fresh = guarded(&store);
    assert_eq!(fresh.find::<Product>(&3).unwrap().unwrap().price, 150);
}

#[test]
fn test_backend_errors_pass_through_unchanged() {
    let store = seeded_store();
    let context = guarded(&store);

    context.add(product(1, "Duplicate keyboard", 10)).unwrap();
    let err = context.save_changes(true).unwrap_err();
    assert!(matches!(
        err,
        Error::DuplicateKey { ref entity, ref key } if entity == "Product" && key == "1"
    ));
    assert!(!err.is_lock_error());

    // The failed call released the lock.
    assert!(!context.lock().is_held());
    assert!(context.find::<Product>(&2).unwrap().is_some());
}

#[test]
fn test_tracker_errors_pass_through_unchanged() {
    let store = seeded_store();
    let context = guarded(&store);

    context.attach(product(9, "Cable", 5)).unwrap();
    assert!(matches!(
        context.attach(product(9, "Cable", 5)),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        context.set_named::<Dependency>("Product"),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        context.set_named::<Product>("Warehouse"),
        Err(Error::EntitySetNotFound(_))
    ));
}

#[test]
fn test_entity_states_through_guarded_set() {
    let store = seeded_store();
    let context = guarded(&store);
    let products = context.set::<Product>().unwrap();

    assert_eq!(products.add(product(10, "Webcam", 60)).unwrap().state(), EntityState::Added);
    assert_eq!(products.remove(product(10, "Webcam", 60)).unwrap().state(), EntityState::Detached);
    assert_eq!(products.remove(product(1, "Keyboard", 40)).unwrap().state(), EntityState::Deleted);

    assert!(products.local().unwrap().is_empty());
    assert_eq!(context.save_changes(true).unwrap(), 1);
    assert_eq!(store.row_count("Product").unwrap(), 3);
}

#[test]
fn test_save_without_accept_then_accept_all_changes() {
    let store = seeded_store();
    let context = guarded(&store);
    context.add(product(11, "Dock", 90)).unwrap();

    assert_eq!(context.save_changes(false).unwrap(), 1);
    assert_eq!(context.entry(&product(11, "Dock", 90)).unwrap().state(), EntityState::Added);

    context.accept_all_changes().unwrap();
    assert_eq!(context.entry(&product(11, "Dock", 90)).unwrap().state(), EntityState::Unchanged);
    assert_eq!(context.save_changes(true).unwrap(), 0);
}

#[test]
fn test_dispose_rejects_later_calls() {
    let store = seeded_store();
    let context = guarded(&store);
    let products = context.set::<Product>().unwrap();
    let query = products.as_queryable();

    context.dispose().unwrap();

    assert!(context.is_disposed());
    assert!(matches!(context.find::<Product>(&1), Err(Error::ObjectDisposed(_))));
    assert!(matches!(products.add(product(12, "Hub", 20)), Err(Error::ObjectDisposed(_))));
    assert!(matches!(query.to_list(), Err(Error::ObjectDisposed(_))));
    assert!(matches!(context.set::<Product>(), Err(Error::ObjectDisposed(_))));
}

#[tokio::test]
async fn test_dispose_fails_pending_waiters() {
    let store = seeded_store();
    let context = Arc::new(guarded(&store));
    let cancel = CancellationToken::new();

    let holder = context.lock().acquire_async("test.hold", &cancel).await.unwrap();

    let waiter = {
        let context = Arc::clone(&context);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            context.find_async::<Product>(&1, &cancel).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    context.dispose_async().await.unwrap();
    drop(holder);

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(Error::ObjectDisposed(_))));
}

#[tokio::test]
async fn test_cancelled_call_never_reaches_backend() {
    let store = seeded_store();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let inner = MemoryContext::builder(store)
        .interceptor(move |_: &Command| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();
    let context = GuardedContext::new(inner);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = context.save_changes_async(true, &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(matches!(
        context.add_async(product(20, "Lamp", 30), &cancel).await,
        Err(Error::Cancelled)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!context.lock().is_held());
}

#[tokio::test]
async fn test_cancel_while_waiting_for_the_lock() {
    let store = seeded_store();
    let context = Arc::new(guarded(&store));
    let holder = context
        .lock()
        .acquire_async("test.hold", &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let context = Arc::clone(&context);
        let cancel = cancel.clone();
        tokio::spawn(async move { context.find_async::<Product>(&1, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    drop(holder);

    // The lock is usable again after the cancelled wait.
    assert!(context.find::<Product>(&1).unwrap().is_some());
}

#[test]
fn test_exclusive_runs_several_calls_as_one_section() {
    let store = seeded_store();
    let context = guarded(&store);

    let saved = context
        .exclusive(|inner| {
            let mut keyboard = inner.find::<Product>(&1)?.ok_or(Error::InvalidOperation("missing".into()))?;
            keyboard.price += 5;
            inner.set::<Product>()?.update(keyboard)?;
            // Held for the whole closure.
            assert!(matches!(context.lock().try_acquire("probe"), Err(Error::LockBusy)));
            inner.save_changes(true)
        })
        .unwrap();

    assert_eq!(saved, 1);
    assert_eq!(context.find::<Product>(&1).unwrap().unwrap().price, 45);
}

#[tokio::test]
async fn test_exclusive_async_section() {
    let store = seeded_store();
    let context = guarded(&store);
    let cancel = CancellationToken::new();

    let total = context
        .exclusive_async(&cancel, |inner| {
            async move {
                let cancel = CancellationToken::new();
                let a = inner.find_async::<Product>(&1, &cancel).await?.map_or(0, |p| p.price);
                let b = inner.find_async::<Product>(&2, &cancel).await?.map_or(0, |p| p.price);
                Ok(a + b)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(total, 65);
}

/// Works with any context, guarded or not.
fn restock<C: PersistenceContext>(context: &C, id: u32) -> guardctx::Result<usize> {
    context.set::<Product>()?.add(product(id, "Restocked", 1))?;
    context.save_changes(true)
}

#[test]
fn test_guarded_context_is_a_drop_in_substitute() {
    let store = seeded_store();
    let raw = memory_context(&store, ContextOptions::new("shop"));
    let wrapped = guarded(&store);

    assert_eq!(restock(&raw, 30).unwrap(), 1);
    assert_eq!(restock(&wrapped, 31).unwrap(), 1);
    assert_eq!(store.row_count("Product").unwrap(), 6);
}

#[test]
fn test_empty_store_reports_missing_set() {
    let context = GuardedContext::new(MemoryContext::new(MemoryStore::new()));
    assert!(matches!(context.set::<Product>(), Err(Error::EntitySetNotFound(_))));
    assert!(!context.lock().is_held());
}
