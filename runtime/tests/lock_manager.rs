//! Integration tests for the lock manager
//!
//! Exercises acquisition with timeout, fencing on release/extend, and
//! ordered multi-key acquisition against the in-memory lock store.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use std::sync::Arc;
use std::time::Duration;
use stockpile_core::lock::{LockError, LockStore};
use stockpile_runtime::{LockManager, StockError};
use stockpile_testing::{InMemoryLockStore, test_clock};

const LEASE: Duration = Duration::from_secs(30);
const SHORT_WAIT: Duration = Duration::from_millis(20);

fn manager() -> (InMemoryLockStore, LockManager) {
    let store = InMemoryLockStore::new();
    let manager = LockManager::new(Arc::new(store.clone()), Arc::new(test_clock()))
        .with_retry_interval(Duration::from_millis(1));
    (store, manager)
}

#[tokio::test]
async fn acquire_then_release() {
    let (store, locks) = manager();

    let lock = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap().unwrap();
    assert_eq!(store.holder("stock:A").as_deref(), Some(lock.lock_id()));
    assert!(locks.is_locked("stock:A").await.unwrap());

    assert!(locks.release(&lock).await.unwrap());
    assert!(!locks.is_locked("stock:A").await.unwrap());
}

#[tokio::test]
async fn acquisition_times_out_while_held() {
    let (_store, locks) = manager();
    let _held = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap().unwrap();

    let started = tokio::time::Instant::now();
    let second = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap();

    assert!(second.is_none());
    assert!(started.elapsed() >= SHORT_WAIT);
}

#[tokio::test]
async fn zero_wait_still_tries_once() {
    let (_store, locks) = manager();

    let lock = locks.acquire("stock:A", LEASE, Duration::ZERO).await.unwrap();

    assert!(lock.is_some());
}

#[tokio::test]
async fn waiter_acquires_after_holder_releases() {
    let (_store, locks) = manager();
    let held = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap().unwrap();

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move { locks.acquire("stock:A", LEASE, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    locks.release(&held).await.unwrap();

    assert!(waiter.await.unwrap().unwrap().is_some());
}

#[tokio::test]
async fn stale_holder_cannot_release_or_extend() {
    let (store, locks) = manager();
    let stale = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap().unwrap();

    // Lease lapses and someone else takes the key.
    store.expire("stock:A");
    let current = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap().unwrap();

    assert!(!locks.release(&stale).await.unwrap());
    assert!(locks.extend(&stale, LEASE).await.unwrap().is_none());
    assert_eq!(store.holder("stock:A").as_deref(), Some(current.lock_id()));
}

#[tokio::test]
async fn extend_lengthens_the_lease() {
    let (store, locks) = manager();
    let lock = locks
        .acquire("stock:A", Duration::from_secs(10), SHORT_WAIT)
        .await
        .unwrap()
        .unwrap();

    let extended = locks
        .extend(&lock, Duration::from_secs(20))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(extended.lock_id(), lock.lock_id());
    assert_eq!(extended.lease_duration(), Duration::from_secs(30));
    assert!(store.ttl("stock:A").unwrap() > Duration::from_secs(20));
}

#[tokio::test]
async fn blank_key_is_rejected() {
    let (_store, locks) = manager();

    let err = locks.acquire("  ", LEASE, SHORT_WAIT).await.unwrap_err();

    assert!(matches!(err, LockError::InvalidKey(_)));
}

#[tokio::test]
async fn acquire_all_sorts_and_deduplicates() {
    let (store, locks) = manager();
    let keys = vec![
        "stock:C".to_string(),
        "stock:A".to_string(),
        "stock:B".to_string(),
        "stock:A".to_string(),
    ];

    let held = locks.acquire_all(&keys, LEASE, SHORT_WAIT).await.unwrap();

    let acquired: Vec<&str> = held.iter().map(|l| l.key()).collect();
    assert_eq!(acquired, ["stock:A", "stock:B", "stock:C"]);
    assert_eq!(store.live_keys(), 3);

    locks.release_all(held).await;
    assert_eq!(store.live_keys(), 0);
}

#[tokio::test]
async fn acquire_all_backs_out_on_contention() {
    let (store, locks) = manager();
    store
        .try_acquire("stock:B", "someone-else", LEASE)
        .await
        .unwrap();
    let keys = vec!["stock:A".to_string(), "stock:B".to_string(), "stock:C".to_string()];

    let err = locks.acquire_all(&keys, LEASE, SHORT_WAIT).await.unwrap_err();

    assert_eq!(
        err,
        StockError::LockUnavailable {
            key: "stock:B".to_string()
        }
    );
    assert!(store.holder("stock:A").is_none());
    assert!(store.holder("stock:C").is_none());
    assert_eq!(store.holder("stock:B").as_deref(), Some("someone-else"));
}

#[tokio::test]
async fn overlapping_key_sets_in_opposite_order_do_not_deadlock() {
    let (_store, locks) = manager();
    let forward = vec!["stock:A".to_string(), "stock:B".to_string()];
    let backward = vec!["stock:B".to_string(), "stock:A".to_string()];

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let locks = locks.clone();
            let keys = if i % 2 == 0 { forward.clone() } else { backward.clone() };
            tokio::spawn(async move {
                let held = locks
                    .acquire_all(&keys, LEASE, Duration::from_secs(10))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                locks.release_all(held).await;
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(tasks))
        .await
        .expect("sorted acquisition must not deadlock");
}

#[tokio::test]
async fn store_outage_surfaces_as_error() {
    let (store, locks) = manager();
    store.simulate_outage("connection refused");

    let err = locks.acquire("stock:A", LEASE, SHORT_WAIT).await.unwrap_err();

    assert!(matches!(err, LockError::Backend(_)));
}
