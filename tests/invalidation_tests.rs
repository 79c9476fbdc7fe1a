//! End-to-end invalidation tests
//!
//! Drive the public API over the in-memory backend: installed handler,
//! repository writes, transactions and reactive queries.
//! Run with: cargo test --test invalidation_tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlhook::driver::{Driver, MockBackend, QueryExecutor, SqlError};
use sqlhook::hook::{EventKind, HookSettings};
use sqlhook::invalidation::{InvalidationHandler, TableInvalidationScope, TableSet};
use sqlhook::repository::Repository;
use tokio_test::assert_ok;

fn tables(names: &[&str]) -> TableSet {
    names.iter().copied().collect()
}

fn setup() -> (Driver, InvalidationHandler) {
    let driver = Driver::new(MockBackend::new(), HookSettings::default());
    let handler = InvalidationHandler::install(&driver).unwrap();
    (driver, handler)
}

/// Reactive query returning how many times it has run.
fn counting_listener(
    executor: &impl QueryExecutor,
    watched: &[&str],
    runs: &Arc<AtomicU32>,
) -> BoxStream<'static, Result<u32, SqlError>> {
    let runs = runs.clone();
    executor
        .listen_for_invalidation(tables(watched), move || {
            let runs = runs.clone();
            async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) }
        })
        .unwrap()
}

async fn assert_quiet(stream: &mut BoxStream<'static, Result<u32, SqlError>>) {
    let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(next.is_err(), "reactive query re-ran unexpectedly");
}

#[tokio::test]
async fn test_autocommit_write_requeries_overlapping_listener_only() {
    let (driver, _handler) = setup();
    let users_runs = Arc::new(AtomicU32::new(0));
    let payments_runs = Arc::new(AtomicU32::new(0));
    let mut users = counting_listener(&driver, &["users", "orders"], &users_runs);
    let mut payments = counting_listener(&driver, &["payments"], &payments_runs);

    assert_eq!(users.next().await.unwrap().unwrap(), 1);
    assert_eq!(payments.next().await.unwrap().unwrap(), 1);

    assert_ok!(
        Repository::new("users")
            .insert(&driver, r#"INSERT INTO users {"id": 1}"#)
            .await
    );

    assert_eq!(users.next().await.unwrap().unwrap(), 2);
    assert_quiet(&mut users).await;
    assert_quiet(&mut payments).await;
    assert_eq!(payments_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_back_to_back_disjoint_writes_leave_listener_quiet() {
    let (driver, _handler) = setup();
    let runs = Arc::new(AtomicU32::new(0));
    let mut payments = counting_listener(&driver, &["payments"], &runs);
    assert_eq!(payments.next().await.unwrap().unwrap(), 1);

    // The listener is not polled between the two writes.
    assert_ok!(
        Repository::new("users")
            .insert(&driver, r#"INSERT INTO users {"id": 1}"#)
            .await
    );
    assert_ok!(
        Repository::new("orders")
            .insert(&driver, r#"INSERT INTO orders {"id": 1}"#)
            .await
    );

    assert_quiet(&mut payments).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wildcard_invalidation_requeries_every_listener() {
    let (driver, handler) = setup();
    let users_runs = Arc::new(AtomicU32::new(0));
    let payments_runs = Arc::new(AtomicU32::new(0));
    let mut users = counting_listener(&driver, &["users"], &users_runs);
    let mut payments = counting_listener(&driver, &["payments"], &payments_runs);
    assert_eq!(users.next().await.unwrap().unwrap(), 1);
    assert_eq!(payments.next().await.unwrap().unwrap(), 1);

    handler.scope().invalidate(TableSet::all());

    assert_eq!(users.next().await.unwrap().unwrap(), 2);
    assert_eq!(payments.next().await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn test_transaction_commit_delivers_one_union_batch() {
    let (driver, handler) = setup();
    let mut batches = handler.scope().invalidations();

    let conn = driver.acquire().await.unwrap();
    let tx = conn.begin().await.unwrap();
    let users = Repository::new("users");
    let orders = Repository::new("orders").with_dependent_tables(["order_totals"]);

    users
        .insert(&tx, r#"INSERT INTO users {"id": 1}"#)
        .await
        .unwrap();
    orders
        .insert(&tx, r#"INSERT INTO orders {"id": 1}"#)
        .await
        .unwrap();
    users
        .update(&tx, r#"UPDATE users SET {"vip": true}"#)
        .await
        .unwrap();
    assert!(batches.try_recv().is_none());

    tx.commit().await.unwrap();
    assert_eq!(
        batches.try_recv().unwrap(),
        tables(&["users", "orders", "order_totals"])
    );
    assert!(batches.try_recv().is_none());
}

#[tokio::test]
async fn test_transaction_rollback_never_reaches_listeners() {
    let (driver, _handler) = setup();
    let runs = Arc::new(AtomicU32::new(0));
    let mut listener = counting_listener(&driver, &["users"], &runs);
    assert_eq!(listener.next().await.unwrap().unwrap(), 1);

    let tx = driver.begin().await.unwrap();
    Repository::new("users")
        .delete(&tx, "DELETE FROM users")
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_quiet(&mut listener).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_listener_inside_transaction_sees_external_commits_only() {
    let (driver, _handler) = setup();
    let tx = driver.begin().await.unwrap();
    let runs = Arc::new(AtomicU32::new(0));
    let mut listener = counting_listener(&tx, &["users"], &runs);
    assert_eq!(listener.next().await.unwrap().unwrap(), 1);

    // The transaction's own pending write stays invisible.
    Repository::new("users")
        .insert(&tx, r#"INSERT INTO users {"id": 1}"#)
        .await
        .unwrap();
    assert_quiet(&mut listener).await;

    // An autocommit write elsewhere is observed.
    Repository::new("users")
        .insert(&driver, r#"INSERT INTO users {"id": 2}"#)
        .await
        .unwrap();
    assert_eq!(listener.next().await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn test_reactive_query_reads_fresh_rows() {
    let (driver, _handler) = setup();
    let reader = driver.clone();
    let mut counts = driver
        .listen_for_invalidation(tables(&["orders"]), move || {
            let reader = reader.clone();
            async move {
                reader
                    .fetch_all("SELECT * FROM orders")
                    .await
                    .map(|rows| rows.len())
            }
        })
        .unwrap();
    assert_eq!(counts.next().await.unwrap().unwrap(), 0);

    let conn = driver.acquire().await.unwrap();
    let tx = conn.begin().await.unwrap();
    let orders = Repository::new("orders");
    orders
        .insert(&tx, r#"INSERT INTO orders {"id": 1}"#)
        .await
        .unwrap();
    orders
        .insert(&tx, r#"INSERT INTO orders {"id": 2}"#)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(counts.next().await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn test_empty_watch_set_emits_once() {
    let (driver, handler) = setup();
    let runs = Arc::new(AtomicU32::new(0));
    let mut listener = counting_listener(&driver, &[], &runs);

    assert_eq!(handler.scope().receiver_count(), 0);
    assert_eq!(listener.next().await.unwrap().unwrap(), 1);
    assert!(listener.next().await.is_none());
}

#[tokio::test]
async fn test_listen_without_handler_is_misuse() {
    let driver = Driver::new(MockBackend::new(), HookSettings::new(true));
    let result = driver.listen_for_invalidation(tables(&["users"]), || async {
        Ok::<_, SqlError>(())
    });
    assert!(matches!(
        result,
        Err(SqlError::MissingInvalidationScope("driver"))
    ));

    // Connections acquired before installation stay without a scope.
    let early = driver.acquire().await.unwrap();
    let _handler = InvalidationHandler::install(&driver).unwrap();
    let late = driver.acquire().await.unwrap();
    assert!(matches!(
        early.invalidation_scope(),
        Err(SqlError::MissingInvalidationScope("connection"))
    ));
    assert_ok!(late.invalidation_scope());
}

#[tokio::test]
async fn test_hook_failure_does_not_undo_write() {
    let backend = MockBackend::new();
    let driver = Driver::new(backend.clone(), HookSettings::default());
    let _handler = InvalidationHandler::install(&driver).unwrap();
    let _broken = driver
        .hook()
        .subscribe([EventKind::AfterInsert], |_| async {
            Err(anyhow::anyhow!("audit sink offline"))
        })
        .unwrap();

    let err = Repository::new("users")
        .insert(&driver, r#"INSERT INTO users {"id": 1}"#)
        .await
        .unwrap_err();
    assert!(err.is_hook_failure());
    assert_eq!(backend.rows("users").len(), 1);
}

#[tokio::test]
async fn test_uninstalled_handler_stops_invalidating() {
    let (driver, handler) = setup();
    let root = handler.scope().clone();
    let mut batches = root.invalidations();
    handler.uninstall();

    Repository::new("users")
        .insert(&driver, r#"INSERT INTO users {"id": 1}"#)
        .await
        .unwrap();
    assert!(batches.try_recv().is_none());
}
