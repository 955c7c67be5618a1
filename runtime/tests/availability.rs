//! Integration tests for lock-guarded stock availability and reservation
//!
//! Runs `StockAvailabilityService` against the in-memory stock store and
//! lock store, covering single-SKU reservations under contention, bundle
//! availability, and bundle sagas with compensation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stockpile_core::inventory::Inventory;
use stockpile_core::lock::LockStore;
use stockpile_core::quantity::Quantity;
use stockpile_core::reservation::ReservationStatus;
use stockpile_core::sku_mapping::{ProductOption, SkuMapping};
use stockpile_runtime::{
    Config, LockManager, ReservationOutcome, SagaStatus, StockAvailabilityService, StockEnvironment,
    StockError,
};
use stockpile_testing::helpers::{init_test_tracing, order, sku};
use stockpile_testing::{InMemoryLockStore, InMemoryStockStore, test_clock};

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    store: InMemoryStockStore,
    locks: InMemoryLockStore,
    service: StockAvailabilityService,
}

fn harness_with_wait(wait_timeout_ms: u64) -> Harness {
    init_test_tracing();
    let store = InMemoryStockStore::new();
    let locks = InMemoryLockStore::new();
    let clock = Arc::new(test_clock());

    let mut config = Config::default();
    config.lock.wait_timeout_ms = wait_timeout_ms;
    config.lock.retry_interval_ms = 1;

    let env = StockEnvironment::from_store(store.clone(), clock.clone());
    let manager = LockManager::new(Arc::new(locks.clone()), clock)
        .with_retry_interval(config.lock.retry_interval());
    Harness {
        store,
        locks,
        service: StockAvailabilityService::new(env, manager, config),
    }
}

fn harness() -> Harness {
    harness_with_wait(5_000)
}

fn stock(store: &InMemoryStockStore, id: &str, total: u32) {
    store.insert_inventory(Inventory::with_initial_stock(sku(id), Quantity::new(total)));
}

fn reserved(store: &InMemoryStockStore, id: &str) -> u32 {
    store.inventory(&sku(id)).unwrap().reserved_quantity().value()
}

fn bundle(name: &str, entries: &[(&str, u32)]) -> ProductOption {
    ProductOption::new(
        name,
        SkuMapping::bundle(entries.iter().map(|(id, q)| (sku(id), Quantity::new(*q)))).unwrap(),
    )
}

// ============================================================================
// Advisory reads
// ============================================================================

#[tokio::test]
async fn single_option_check_compares_available_quantity() {
    let h = harness();
    stock(&h.store, "SKU001", 10);

    assert!(h.service.check_single_option(&sku("SKU001"), Quantity::new(10)).await.unwrap());
    assert!(!h.service.check_single_option(&sku("SKU001"), Quantity::new(11)).await.unwrap());
    assert!(!h.service.check_single_option(&sku("UNKNOWN"), Quantity::new(1)).await.unwrap());
}

#[tokio::test]
async fn bundle_availability_is_minimum_of_whole_sets() {
    let h = harness();
    stock(&h.store, "SKU001", 100);
    stock(&h.store, "SKU002", 90);
    let option = bundle("gift-set", &[("SKU001", 2), ("SKU002", 3)]);

    let result = h.service.check_bundle_availability(option.mapping()).await.unwrap();

    assert_eq!(result.available_sets, 30);
    assert!(result.is_available());
    assert_eq!(h.locks.live_keys(), 0, "composite lock must be released");
    assert!(h.service.check_bundle_option(&option, 30).await.unwrap());
    assert!(!h.service.check_bundle_option(&option, 31).await.unwrap());
}

#[tokio::test]
async fn bundle_with_untracked_sku_is_unavailable() {
    let h = harness();
    stock(&h.store, "SKU001", 100);
    let option = bundle("gift-set", &[("SKU001", 1), ("GHOST", 1)]);

    let result = h.service.check_bundle_availability(option.mapping()).await.unwrap();

    assert_eq!(result.available_sets, 0);
    assert!(!result.is_available());
}

#[tokio::test]
async fn bundle_check_reports_contended_composite_lock() {
    let h = harness_with_wait(20);
    let option = bundle("gift-set", &[("B", 1), ("A", 1)]);
    h.locks
        .try_acquire("bundle-stock-check:A:B", "someone-else", Duration::from_secs(30))
        .await
        .unwrap();

    let err = h.service.check_bundle_availability(option.mapping()).await.unwrap_err();

    assert_eq!(
        err,
        StockError::LockUnavailable {
            key: "bundle-stock-check:A:B".to_string()
        }
    );
}

#[tokio::test]
async fn option_queries_cover_singles_and_bundles() {
    let h = harness();
    stock(&h.store, "A", 7);
    stock(&h.store, "B", 4);
    let single = ProductOption::single("single-a", sku("A"));
    let pair = bundle("pair", &[("A", 2), ("B", 1)]);

    let single_result = h.service.option_availability(&single).await.unwrap();
    assert!(single_result.available);
    assert_eq!(single_result.quantity, 7);

    let pair_result = h.service.option_availability(&pair).await.unwrap();
    assert_eq!(pair_result.quantity, 3);

    let quantities = h.service.bundle_available_quantities(&pair).await.unwrap();
    assert_eq!(quantities[&sku("A")], Quantity::new(7));
    assert_eq!(quantities[&sku("B")], Quantity::new(4));

    let requested = HashMap::from([("single-a".to_string(), 7), ("pair".to_string(), 4)]);
    let unknown = ProductOption::single("not-requested", sku("A"));
    let checks = h
        .service
        .check_multiple_options(&[single, pair, unknown], &requested)
        .await
        .unwrap();
    assert!(checks["single-a"]);
    assert!(!checks["pair"]);
    assert!(!checks["not-requested"]);
}

// ============================================================================
// Single-SKU reservation
// ============================================================================

#[tokio::test]
async fn reserve_stock_persists_reservation_and_releases_lock() {
    let h = harness();
    stock(&h.store, "SKU001", 10);

    let outcome = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::new(3), &order("ORDER-1"))
        .await
        .unwrap();

    let ReservationOutcome::Reserved { reservations } = outcome else {
        panic!("expected a reservation");
    };
    assert_eq!(reservations.len(), 1);
    let stored = h.store.reservation(&reservations[0].reservation_id).unwrap();
    assert_eq!(stored.status(), ReservationStatus::Active);
    assert_eq!(stored.quantity(), Quantity::new(3));
    assert_eq!(reserved(&h.store, "SKU001"), 3);
    assert_eq!(h.locks.live_keys(), 0);
}

#[tokio::test]
async fn insufficient_stock_is_an_outcome_not_an_error() {
    let h = harness();
    stock(&h.store, "SKU001", 2);

    let outcome = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::new(3), &order("ORDER-1"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReservationOutcome::InsufficientStock {
            sku_id: sku("SKU001"),
            available: Quantity::new(2),
            requested: Quantity::new(3),
        }
    );
    assert_eq!(reserved(&h.store, "SKU001"), 0);
    assert!(h.store.reservations().is_empty());
    assert_eq!(h.locks.live_keys(), 0);
}

#[tokio::test]
async fn untracked_sku_has_nothing_to_reserve() {
    let h = harness();

    let outcome = h
        .service
        .reserve_stock(&sku("GHOST"), Quantity::new(1), &order("ORDER-1"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ReservationOutcome::InsufficientStock { available, .. } if available.is_zero()
    ));
}

#[tokio::test]
async fn contended_lock_leaves_inventory_untouched() {
    let h = harness_with_wait(20);
    stock(&h.store, "SKU001", 10);
    h.locks
        .try_acquire("stock:SKU001", "someone-else", Duration::from_secs(30))
        .await
        .unwrap();

    let outcome = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::new(1), &order("ORDER-1"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReservationOutcome::LockUnavailable {
            key: "stock:SKU001".to_string()
        }
    );
    assert_eq!(reserved(&h.store, "SKU001"), 0);
    assert_eq!(h.locks.holder("stock:SKU001").as_deref(), Some("someone-else"));
}

#[tokio::test]
async fn lock_store_outage_is_an_error() {
    let h = harness();
    stock(&h.store, "SKU001", 10);
    h.locks.simulate_outage("connection refused");

    let err = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::new(1), &order("ORDER-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, StockError::Lock(_)));
    assert!(err.is_retryable());
    assert_eq!(reserved(&h.store, "SKU001"), 0);
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let h = harness();
    stock(&h.store, "SKU001", 10);

    let err = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::zero(), &order("ORDER-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, StockError::Validation(_)));
}

async fn race(available: u32, demand: u32, callers: usize) -> (usize, usize, u32) {
    let h = harness_with_wait(30_000);
    stock(&h.store, "HOT", available);
    let service = Arc::new(h.service);

    let handles: Vec<_> = (0..callers)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .reserve_stock(&sku("HOT"), Quantity::new(demand), &order(&format!("ORDER-{i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReservationOutcome::Reserved { .. } => succeeded += 1,
            ReservationOutcome::InsufficientStock { .. } => insufficient += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    let left = h.store.inventory(&sku("HOT")).unwrap().available_quantity().value();
    (succeeded, insufficient, left)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let (succeeded, insufficient, left) = race(50, 1, 100).await;

    assert_eq!(succeeded, 50);
    assert_eq!(insufficient, 50);
    assert_eq!(left, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_succeed_floor_of_available_over_demand() {
    let (succeeded, insufficient, left) = race(100, 3, 40).await;

    assert_eq!(succeeded, 33);
    assert_eq!(insufficient, 7);
    assert_eq!(left, 1);
}

// ============================================================================
// Bundle saga
// ============================================================================

#[tokio::test]
async fn bundle_reservation_reserves_every_sku() {
    let h = harness();
    stock(&h.store, "SKU001", 10);
    stock(&h.store, "SKU002", 10);
    let option = bundle("pair", &[("SKU001", 2), ("SKU002", 1)]);

    let result = h
        .service
        .reserve_bundle_stock(&option, 3, &order("ORDER-1"))
        .await
        .unwrap();

    assert!(result.is_reserved());
    assert_eq!(result.saga.status(), SagaStatus::Completed);
    assert_eq!(reserved(&h.store, "SKU001"), 6);
    assert_eq!(reserved(&h.store, "SKU002"), 3);
    assert_eq!(h.store.reservations().len(), 2);
    assert_eq!(h.locks.live_keys(), 0);
}

#[tokio::test]
async fn short_bundle_component_reserves_nothing() {
    let h = harness();
    stock(&h.store, "SKU001", 10);
    stock(&h.store, "SKU002", 1);
    let option = bundle("pair", &[("SKU001", 2), ("SKU002", 1)]);

    let result = h
        .service
        .reserve_bundle_stock(&option, 2, &order("ORDER-1"))
        .await
        .unwrap();

    assert_eq!(
        result.outcome,
        ReservationOutcome::InsufficientStock {
            sku_id: sku("SKU002"),
            available: Quantity::new(1),
            requested: Quantity::new(2),
        }
    );
    assert_eq!(result.saga.status(), SagaStatus::Failed);
    assert_eq!(reserved(&h.store, "SKU001"), 0);
    assert!(h.store.reservations().is_empty());
    assert_eq!(h.locks.live_keys(), 0);
}

#[tokio::test]
async fn failed_bundle_step_releases_earlier_reservations() {
    let h = harness();
    stock(&h.store, "SKU001", 10);
    stock(&h.store, "SKU002", 10);
    h.store.fail_inventory_writes_for(&sku("SKU002"));
    let option = bundle("pair", &[("SKU001", 2), ("SKU002", 1)]);

    let result = h
        .service
        .reserve_bundle_stock(&option, 1, &order("ORDER-1"))
        .await
        .unwrap();

    assert!(matches!(result.outcome, ReservationOutcome::Compensated { .. }));
    assert_eq!(result.saga.status(), SagaStatus::Compensated);
    assert_eq!(reserved(&h.store, "SKU001"), 0);
    assert_eq!(reserved(&h.store, "SKU002"), 0);

    let reservations = h.store.reservations();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].sku_id(), &sku("SKU001"));
    assert_eq!(reservations[0].status(), ReservationStatus::Released);
    assert_eq!(h.locks.live_keys(), 0);
}

#[tokio::test]
async fn bundle_lock_contention_touches_nothing() {
    let h = harness_with_wait(20);
    stock(&h.store, "SKU001", 10);
    stock(&h.store, "SKU002", 10);
    h.locks
        .try_acquire("stock:SKU002", "someone-else", Duration::from_secs(30))
        .await
        .unwrap();
    let option = bundle("pair", &[("SKU001", 1), ("SKU002", 1)]);

    let result = h
        .service
        .reserve_bundle_stock(&option, 1, &order("ORDER-1"))
        .await
        .unwrap();

    assert_eq!(
        result.outcome,
        ReservationOutcome::LockUnavailable {
            key: "stock:SKU002".to_string()
        }
    );
    assert_eq!(result.saga.status(), SagaStatus::Failed);
    assert_eq!(reserved(&h.store, "SKU001"), 0);
    assert!(h.locks.holder("stock:SKU001").is_none(), "partial locks are released");
}

// ============================================================================
// Release under lock
// ============================================================================

#[tokio::test]
async fn release_returns_stock_and_rejects_second_release() {
    let h = harness();
    stock(&h.store, "SKU001", 10);
    let outcome = h
        .service
        .reserve_stock(&sku("SKU001"), Quantity::new(4), &order("ORDER-1"))
        .await
        .unwrap();
    let ReservationOutcome::Reserved { reservations } = outcome else {
        panic!("expected a reservation");
    };
    let id = reservations[0].reservation_id;

    let released = h.service.release_reservation(&id).await.unwrap();
    assert_eq!(released.status(), ReservationStatus::Released);
    assert_eq!(reserved(&h.store, "SKU001"), 0);

    let err = h.service.release_reservation(&id).await.unwrap_err();
    assert!(matches!(err, StockError::InvalidState(_)));
    assert_eq!(h.locks.live_keys(), 0);
}
