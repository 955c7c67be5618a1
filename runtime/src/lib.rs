//! # Stockpile Runtime
//!
//! Reservation services for the stockpile inventory subsystem.
//!
//! This crate wires the domain model from `stockpile-core` to persistence and
//! lock-store ports and exposes the operations callers invoke in-process.
//!
//! ## Core Components
//!
//! - **`StockAvailabilityService`**: advisory availability reads, plus
//!   lock-guarded single-SKU and bundle reservations (bundles run as a saga
//!   with backward compensation)
//! - **`ReserveStockService`**: all-or-nothing batch reservation of order lines
//! - **`ReserveBundleStockService`**: transactional reservation of bundle lines
//! - **`ReleaseReservationService`** / **`ConfirmReservationService`**: the
//!   reservation state machine applied to stored reservations
//! - **`ReceiveStockService`**: adds received stock to an inventory
//! - **`LockManager`**: blocking acquire with timeout over a `LockStore`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stockpile_core::environment::SystemClock;
//! use stockpile_core::lock::LockStore;
//! use stockpile_core::quantity::Quantity;
//! use stockpile_core::types::{OrderId, SkuId};
//! use stockpile_runtime::{Config, LockManager, StockAvailabilityService, StockEnvironment};
//!
//! # async fn example(env: StockEnvironment, store: Arc<dyn LockStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env();
//! let locks = LockManager::new(store, Arc::new(SystemClock))
//!     .with_retry_interval(config.lock.retry_interval());
//! let service = StockAvailabilityService::new(env, locks, config);
//!
//! let outcome = service
//!     .reserve_stock(&SkuId::new("SKU001")?, Quantity::new(2), &OrderId::new("ORDER-1")?)
//!     .await?;
//! if outcome.is_reserved() {
//!     // proceed to payment
//! }
//! # Ok(())
//! # }
//! ```

/// Stock availability checks and lock-guarded reservations
pub mod availability;

/// Configuration loaded from environment variables
pub mod config;

/// Confirming reservations into deductions
pub mod confirm;

/// Injected ports shared by the services
pub mod environment;

/// Error taxonomy for the services
pub mod error;

/// Distributed lock service
pub mod lock;

/// Prometheus metrics for observability
pub mod metrics;

/// Receiving stock
pub mod receive;

/// Releasing reservations
pub mod release;

/// Transactional bundle reservation
pub mod reserve_bundle;

/// Batch reservation of order lines
pub mod reserve_stock;

/// Bundle saga bookkeeping
pub mod saga;

pub use availability::{
    AvailabilityResult, BundleAvailabilityResult, BundleReservationOutcome, ReservationOutcome,
    ReservedStock, SkuAvailability, StockAvailabilityService,
};
pub use config::Config;
pub use confirm::{ConfirmReservationCommand, ConfirmReservationService};
pub use environment::StockEnvironment;
pub use error::{Result, StockError};
pub use lock::LockManager;
pub use metrics::MetricsRecorder;
pub use receive::{ReceiveStockCommand, ReceiveStockService};
pub use release::{ReleaseReservationCommand, ReleaseReservationService};
pub use reserve_bundle::{
    BundleItem, BundleReservationResponse, BundleReservationStatus, BundleSkuMapping,
    ReserveBundleStockCommand, ReserveBundleStockService, SkuReservation,
};
pub use reserve_stock::{
    LineItemReservation, ReserveStockCommand, ReserveStockItem, ReserveStockResponse,
    ReserveStockService,
};
pub use saga::{BundleReservationSaga, SagaId, SagaStatus};
