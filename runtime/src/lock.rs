//! Lock service over a [`LockStore`].
//!
//! [`LockManager`] adds the blocking-with-timeout acquire loop, fencing-token
//! generation, and ordered multi-key acquisition on top of the store's atomic
//! primitives.

use crate::error::StockError;
use crate::metrics::LockMetrics;
use std::sync::Arc;
use std::time::Duration;
use stockpile_core::environment::Clock;
use stockpile_core::lock::{DistributedLock, LockError, LockStore};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

/// Default delay between acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Acquires, releases, and extends distributed locks.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use stockpile_core::environment::SystemClock;
/// use stockpile_core::lock::LockStore;
/// use stockpile_runtime::lock::LockManager;
///
/// # async fn example(store: Arc<dyn LockStore>) -> Result<(), Box<dyn std::error::Error>> {
/// let locks = LockManager::new(store, Arc::new(SystemClock));
/// if let Some(lock) = locks
///     .acquire("stock:SKU001", Duration::from_secs(30), Duration::from_secs(5))
///     .await?
/// {
///     // critical section
///     locks.release(&lock).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    retry_interval: Duration,
}

impl LockManager {
    /// Create a lock manager polling every [`DEFAULT_RETRY_INTERVAL`].
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the delay between acquisition attempts.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Acquire `key` for `lease`, retrying until `wait_timeout` elapses.
    ///
    /// Always makes at least one attempt. Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the key is empty or the store fails.
    pub async fn acquire(
        &self,
        key: &str,
        lease: Duration,
        wait_timeout: Duration,
    ) -> Result<Option<DistributedLock>, LockError> {
        if key.trim().is_empty() {
            return Err(LockError::InvalidKey(key.to_string()));
        }

        let lock_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = started + wait_timeout;

        loop {
            if self.store.try_acquire(key, &lock_id, lease).await? {
                let waited = started.elapsed();
                LockMetrics::record_acquired(waited);
                tracing::debug!(key, lock_id = %lock_id, waited = ?waited, "Lock acquired");
                return Ok(Some(DistributedLock::new(
                    key,
                    lock_id,
                    self.clock.now(),
                    lease,
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = started.elapsed();
                LockMetrics::record_timeout(waited);
                tracing::warn!(key, waited = ?waited, "Lock acquisition timed out");
                return Ok(None);
            }
            sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    /// Release `lock` if it is still the current holder.
    ///
    /// Returns `false` when the lease was already lost.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store fails.
    pub async fn release(&self, lock: &DistributedLock) -> Result<bool, LockError> {
        let released = self.store.release(lock.key(), lock.lock_id()).await?;
        if released {
            tracing::debug!(key = lock.key(), lock_id = lock.lock_id(), "Lock released");
        } else {
            LockMetrics::record_release_failure();
            tracing::warn!(
                key = lock.key(),
                lock_id = lock.lock_id(),
                "Lock release skipped: lease no longer owned"
            );
        }
        Ok(released)
    }

    /// Extend `lock` by `additional` if it is still the current holder.
    ///
    /// The store's expiry is reset to the lock's remaining time plus
    /// `additional`. Returns the extended lock, or `None` if ownership was lost.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store fails.
    pub async fn extend(
        &self,
        lock: &DistributedLock,
        additional: Duration,
    ) -> Result<Option<DistributedLock>, LockError> {
        let ttl = lock
            .remaining_time(self.clock.now())
            .saturating_add(additional);
        if self.store.extend(lock.key(), lock.lock_id(), ttl).await? {
            tracing::debug!(key = lock.key(), additional = ?additional, "Lock extended");
            Ok(Some(lock.extended_by(additional)))
        } else {
            tracing::warn!(key = lock.key(), "Lock extension refused: lease no longer owned");
            Ok(None)
        }
    }

    /// Whether `key` is currently held by anyone. Diagnostic only.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the store fails.
    pub async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        self.store.exists(key).await
    }

    /// Acquire every key in lexicographic order.
    ///
    /// Duplicate keys are acquired once. If any key cannot be acquired, the
    /// ones already held are released in reverse order before returning.
    ///
    /// # Errors
    ///
    /// - [`StockError::LockUnavailable`] naming the first key that timed out
    /// - [`StockError::Lock`] if the store fails
    pub async fn acquire_all(
        &self,
        keys: &[String],
        lease: Duration,
        wait_timeout: Duration,
    ) -> crate::error::Result<Vec<DistributedLock>> {
        let mut ordered: Vec<&String> = keys.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for key in ordered {
            match self.acquire(key, lease, wait_timeout).await {
                Ok(Some(lock)) => held.push(lock),
                Ok(None) => {
                    self.release_all(held).await;
                    return Err(StockError::LockUnavailable { key: key.clone() });
                }
                Err(e) => {
                    self.release_all(held).await;
                    return Err(e.into());
                }
            }
        }
        Ok(held)
    }

    /// Release `locks` in reverse order, logging failures instead of returning them.
    pub async fn release_all(&self, locks: Vec<DistributedLock>) {
        for lock in locks.into_iter().rev() {
            if let Err(e) = self.release(&lock).await {
                LockMetrics::record_release_failure();
                tracing::error!(key = lock.key(), error = %e, "Failed to release lock");
            }
        }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}
