//! Distributed mutual exclusion: the held-lease value object and the store port.
//!
//! A [`DistributedLock`] is what a caller holds after a successful acquisition.
//! Its `lock_id` is a fencing token: the [`LockStore`] only releases or extends
//! a key whose stored value still equals that token, so a holder whose lease
//! expired (and was re-acquired by someone else) cannot disturb the new holder.
//!
//! # Implementations
//!
//! - `RedisLockStore` (in `stockpile-redis`): `SET NX PX` plus Lua check-and-act scripts
//! - `InMemoryLockStore` (in `stockpile-testing`): same contract behind a mutex

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a lock store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The backing store could not be reached or returned an error.
    #[error("Lock store error: {0}")]
    Backend(String),

    /// The key is unusable (empty).
    #[error("Invalid lock key: {0:?}")]
    InvalidKey(String),
}

/// A held mutual-exclusion lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedLock {
    key: String,
    lock_id: String,
    acquired_at: DateTime<Utc>,
    lease_duration: Duration,
}

impl DistributedLock {
    /// Creates a lock value.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        lock_id: impl Into<String>,
        acquired_at: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            lock_id: lock_id.into(),
            acquired_at,
            lease_duration,
        }
    }

    /// Logical resource name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fencing token unique to this acquisition.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// When the lease started.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Length of the lease.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// `acquired_at + lease_duration`, saturating at the maximum representable time.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lease_duration)
            .ok()
            .and_then(|lease| self.acquired_at.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `now > acquired_at + lease_duration`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Time left on the lease, zero once expired.
    #[must_use]
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// [`DistributedLock::remaining_time`] in whole milliseconds, clamped to ≥ 0.
    #[must_use]
    pub fn remaining_time_millis(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(self.remaining_time(now).as_millis()).unwrap_or(u64::MAX)
    }

    /// Same lock with its lease lengthened by `additional`.
    #[must_use]
    pub fn extended_by(&self, additional: Duration) -> Self {
        Self {
            key: self.key.clone(),
            lock_id: self.lock_id.clone(),
            acquired_at: self.acquired_at,
            lease_duration: self.lease_duration.saturating_add(additional),
        }
    }
}

/// Atomic conditional operations on a shared key/value store.
///
/// Every method must be a single atomic operation against the store so that
/// exclusivity holds across processes.
pub trait LockStore: Send + Sync {
    /// Sets `key = lock_id` with a time-to-live of `ttl` only if `key` is absent.
    ///
    /// Returns `true` when this call created the key.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store is unavailable.
    fn try_acquire(
        &self,
        key: &str,
        lock_id: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + '_>>;

    /// Deletes `key` only if its value equals `lock_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store is unavailable.
    fn release(
        &self,
        key: &str,
        lock_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + '_>>;

    /// Resets the time-to-live of `key` to `ttl` only if its value equals `lock_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store is unavailable.
    fn extend(
        &self,
        key: &str,
        lock_id: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + '_>>;

    /// Whether `key` currently exists. Diagnostic only.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store is unavailable.
    fn exists(&self, key: &str)
    -> Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn expiry_and_remaining_time() {
        let lock = DistributedLock::new("stock:A", "id-1", t0(), Duration::from_secs(30));

        assert_eq!(lock.remaining_time_millis(t0()), 30_000);
        assert!(!lock.is_expired(t0() + chrono::Duration::seconds(30)));
        assert!(lock.is_expired(t0() + chrono::Duration::seconds(31)));
        assert_eq!(lock.remaining_time_millis(t0() + chrono::Duration::seconds(45)), 0);
    }

    #[test]
    fn extension_keeps_identity() {
        let lock = DistributedLock::new("stock:A", "id-1", t0(), Duration::from_secs(30));
        let extended = lock.extended_by(Duration::from_secs(10));

        assert_eq!(extended.lock_id(), "id-1");
        assert_eq!(extended.acquired_at(), t0());
        assert_eq!(extended.lease_duration(), Duration::from_secs(40));
    }
}
