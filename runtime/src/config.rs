//! Configuration management for the reservation services.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{Result, StockError};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Reservation behaviour
    pub reservation: ReservationConfig,
    /// Distributed lock behaviour
    pub lock: LockConfig,
}

/// Reservation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Default reservation time-to-live in seconds (default: 15 minutes)
    pub ttl_secs: u64,
    /// Maximum SKUs loaded per batch read (default: 1000)
    pub batch_size: usize,
    /// Maximum missing SKU ids listed in a not-found error (default: 10)
    pub missing_sku_report_limit: usize,
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Prefix for per-SKU lock keys (default: `stock:`)
    pub key_prefix: String,
    /// Prefix for composite bundle availability lock keys (default: `bundle-stock-check:`)
    pub bundle_check_key_prefix: String,
    /// Lease length in milliseconds (default: 30000)
    pub lease_ms: u64,
    /// How long acquisition keeps retrying, in milliseconds (default: 5000)
    pub wait_timeout_ms: u64,
    /// Delay between acquisition attempts, in milliseconds (default: 50)
    pub retry_interval_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            batch_size: 1000,
            missing_sku_report_limit: 10,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "stock:".to_string(),
            bundle_check_key_prefix: "bundle-stock-check:".to_string(),
            lease_ms: 30_000,
            wait_timeout_ms: 5_000,
            retry_interval_ms: 50,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let reservation = ReservationConfig::default();
        let lock = LockConfig::default();
        Self {
            reservation: ReservationConfig {
                ttl_secs: env::var("STOCK_RESERVATION_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(reservation.ttl_secs),
                batch_size: env::var("STOCK_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|size| *size > 0)
                    .unwrap_or(reservation.batch_size),
                missing_sku_report_limit: env::var("STOCK_MISSING_SKU_REPORT_LIMIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(reservation.missing_sku_report_limit),
            },
            lock: LockConfig {
                key_prefix: env::var("STOCK_LOCK_KEY_PREFIX").unwrap_or(lock.key_prefix),
                bundle_check_key_prefix: env::var("STOCK_BUNDLE_CHECK_KEY_PREFIX")
                    .unwrap_or(lock.bundle_check_key_prefix),
                lease_ms: env::var("STOCK_LOCK_LEASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(lock.lease_ms),
                wait_timeout_ms: env::var("STOCK_LOCK_WAIT_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(lock.wait_timeout_ms),
                retry_interval_ms: env::var("STOCK_LOCK_RETRY_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(lock.retry_interval_ms),
            },
        }
    }
}

impl ReservationConfig {
    /// Reservation TTL as a chrono duration.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        let secs = self.ttl_secs.min(u64::from(u32::MAX));
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::from(u32::MAX)))
    }

    /// TTL for a request: `override_secs` when given, else the default.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Validation`] for a zero or out-of-range override.
    pub fn resolve_ttl(&self, override_secs: Option<u64>) -> Result<chrono::Duration> {
        match override_secs {
            None => Ok(self.ttl()),
            Some(0) => Err(StockError::Validation(
                "reservation TTL must be greater than zero".to_string(),
            )),
            Some(secs) => i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .ok_or_else(|| {
                    StockError::Validation(format!("reservation TTL {secs}s is out of range"))
                }),
        }
    }
}

impl LockConfig {
    /// Lease length.
    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Acquisition wait timeout.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Delay between acquisition attempts.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Lock key guarding one SKU's inventory row.
    #[must_use]
    pub fn sku_key(&self, sku_id: &stockpile_core::types::SkuId) -> String {
        format!("{}{sku_id}", self.key_prefix)
    }

    /// Composite lock key for a bundle availability check over sorted SKUs.
    #[must_use]
    pub fn bundle_check_key(&self, mapping: &stockpile_core::sku_mapping::SkuMapping) -> String {
        format!("{}{}", self.bundle_check_key_prefix, mapping.joined_sku_ids())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use stockpile_core::quantity::Quantity;
    use stockpile_core::sku_mapping::SkuMapping;
    use stockpile_core::types::SkuId;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.reservation.ttl(), chrono::Duration::minutes(15));
        assert_eq!(config.reservation.batch_size, 1000);
        assert_eq!(config.lock.lease(), Duration::from_secs(30));
        assert_eq!(config.lock.wait_timeout(), Duration::from_secs(5));
        assert_eq!(config.lock.retry_interval(), Duration::from_millis(50));
    }

    #[test]
    fn lock_keys() {
        let lock = LockConfig::default();
        let sku = SkuId::new("SKU001").unwrap();
        assert_eq!(lock.sku_key(&sku), "stock:SKU001");

        let mapping = SkuMapping::bundle([
            (SkuId::new("SKU002").unwrap(), Quantity::new(1)),
            (SkuId::new("SKU001").unwrap(), Quantity::new(2)),
        ])
        .unwrap();
        assert_eq!(lock.bundle_check_key(&mapping), "bundle-stock-check:SKU001:SKU002");
    }
}
