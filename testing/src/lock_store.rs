//! In-memory lock store with the same check-and-act contract as Redis.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stockpile_core::lock::{LockError, LockStore};
use tokio::time::Instant;

type LockFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + 'a>>;

#[derive(Debug, Clone)]
struct Entry {
    lock_id: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    outage: Option<String>,
}

impl Inner {
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn check_available(&self) -> Result<(), LockError> {
        match &self.outage {
            Some(reason) => Err(LockError::Backend(reason.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory lock store.
///
/// Each operation runs under one mutex, making it atomic. Keys expire on
/// their own after the TTL passed at acquisition or extension, measured on
/// the tokio clock so paused-time tests can step past a lease.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryLockStore {
    /// Create an empty lock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current holder of `key`, if the lease is live (for testing).
    #[must_use]
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner().live_entry(key, now).map(|e| e.lock_id.clone())
    }

    /// Remaining TTL of `key` (for testing).
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.inner()
            .live_entry(key, now)
            .map(|e| e.expires_at.saturating_duration_since(now))
    }

    /// Expire `key` immediately, as if its lease ran out (for testing).
    pub fn expire(&self, key: &str) {
        self.inner().entries.remove(key);
    }

    /// Number of live keys (for testing).
    #[must_use]
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.inner().entries.values().filter(|e| e.is_live(now)).count()
    }

    /// Make every operation fail with a backend error until [`InMemoryLockStore::restore`].
    pub fn simulate_outage(&self, reason: impl Into<String>) {
        self.inner().outage = Some(reason.into());
    }

    /// End a simulated outage.
    pub fn restore(&self) {
        self.inner().outage = None;
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire(&self, key: &str, lock_id: &str, ttl: Duration) -> LockFuture<'_> {
        let result = {
            let mut inner = self.inner();
            inner.check_available().map(|()| {
                let now = Instant::now();
                if inner.live_entry(key, now).is_some() {
                    false
                } else {
                    inner.entries.insert(
                        key.to_string(),
                        Entry {
                            lock_id: lock_id.to_string(),
                            expires_at: now + ttl,
                        },
                    );
                    true
                }
            })
        };
        Box::pin(async move { result })
    }

    fn release(&self, key: &str, lock_id: &str) -> LockFuture<'_> {
        let result = {
            let mut inner = self.inner();
            inner.check_available().map(|()| {
                let now = Instant::now();
                let owned = inner
                    .live_entry(key, now)
                    .is_some_and(|e| e.lock_id == lock_id);
                if owned {
                    inner.entries.remove(key);
                }
                owned
            })
        };
        Box::pin(async move { result })
    }

    fn extend(&self, key: &str, lock_id: &str, ttl: Duration) -> LockFuture<'_> {
        let result = {
            let mut inner = self.inner();
            inner.check_available().map(|()| {
                let now = Instant::now();
                match inner.live_entry(key, now) {
                    Some(entry) if entry.lock_id == lock_id => {
                        entry.expires_at = now + ttl;
                        true
                    }
                    _ => false,
                }
            })
        };
        Box::pin(async move { result })
    }

    fn exists(&self, key: &str) -> LockFuture<'_> {
        let result = {
            let mut inner = self.inner();
            inner
                .check_available()
                .map(|()| inner.live_entry(key, Instant::now()).is_some())
        };
        Box::pin(async move { result })
    }
}
