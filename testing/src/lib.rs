//! # Stockpile Testing
//!
//! Test doubles for the Stockpile ports.
//!
//! This crate provides:
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`InMemoryStockStore`]: inventory and reservation repositories plus a
//!   unit of work with commit/rollback, optimistic versioning, and fault injection
//! - [`InMemoryLockStore`]: a lock store honouring the same atomic
//!   check-and-act contract as the Redis adapter
//! - [`helpers`]: fixtures and tracing setup
//!
//! ## Example
//!
//! ```
//! use stockpile_core::inventory::Inventory;
//! use stockpile_core::quantity::Quantity;
//! use stockpile_testing::{InMemoryStockStore, helpers::sku};
//!
//! let store = InMemoryStockStore::new();
//! store.insert_inventory(Inventory::with_initial_stock(sku("SKU001"), Quantity::new(10)));
//! assert_eq!(store.inventory(&sku("SKU001")).unwrap().total_quantity(), Quantity::new(10));
//! ```

use chrono::{DateTime, Utc};
use stockpile_core::environment::Clock;

pub mod lock_store;
pub mod stock_store;

pub use lock_store::InMemoryLockStore;
pub use stock_store::InMemoryStockStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use stockpile_testing::mocks::FixedClock;
    /// use stockpile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Fixtures and setup shared by test suites.
pub mod helpers {
    use stockpile_core::types::{OrderId, SkuId};

    /// Builds a [`SkuId`], panicking on blank input.
    ///
    /// # Panics
    ///
    /// Panics if `id` is blank.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sku(id: &str) -> SkuId {
        SkuId::new(id).expect("fixture SKU id must not be blank")
    }

    /// Builds an [`OrderId`], panicking on blank input.
    ///
    /// # Panics
    ///
    /// Panics if `id` is blank.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn order(id: &str) -> OrderId {
        OrderId::new(id).expect("fixture order id must not be blank")
    }

    /// Installs a test-friendly tracing subscriber once per process.
    ///
    /// Honours `RUST_LOG`, defaulting to `warn`.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
