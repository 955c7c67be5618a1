//! # Stockpile Core
//!
//! Domain model and ports for reserving stock under concurrent access.
//!
//! This crate has no I/O. It provides:
//!
//! - [`quantity::Quantity`]: checked non-negative arithmetic
//! - [`inventory::Inventory`]: per-SKU total/reserved bookkeeping with `reserved ≤ total`
//! - [`reservation::Reservation`]: TTL-bound claim with an `Active → Released | Confirmed` state machine
//! - [`sku_mapping::SkuMapping`] / [`sku_mapping::ProductOption`]: single-SKU and bundle options
//! - [`lock::DistributedLock`] and the [`lock::LockStore`] port
//! - [`movement::StockMovement`]: ledger entry for every change to on-hand stock
//! - [`repository`]: persistence ports and the unit-of-work boundary
//! - [`environment::Clock`]: injectable time
//!
//! ## Example
//!
//! ```
//! use stockpile_core::inventory::Inventory;
//! use stockpile_core::quantity::Quantity;
//! use stockpile_core::types::SkuId;
//!
//! let mut inventory = Inventory::with_initial_stock(SkuId::new("SKU001").unwrap(), Quantity::new(10));
//! assert!(inventory.reserve(Quantity::new(11)).is_err());
//! assert!(inventory.reserve(Quantity::new(10)).is_ok());
//! assert!(inventory.available_quantity().is_zero());
//! ```

pub mod inventory;
pub mod lock;
pub mod movement;
pub mod quantity;
pub mod repository;
pub mod reservation;
pub mod sku_mapping;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - Dependency injection traits
///
/// External dependencies the domain needs are abstracted behind traits and
/// injected into services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use stockpile_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
