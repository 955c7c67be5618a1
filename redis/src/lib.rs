//! Redis-backed [`LockStore`] for the stockpile reservation services.
//!
//! Each lock is a single Redis string:
//! - **Key**: `{key_prefix}{lock key}`, e.g. `distributed_lock:stock:SKU001`
//! - **Value**: the holder's fencing token (`lock_id`)
//! - **TTL**: the lease, set atomically with `SET NX PX`
//!
//! Release and extension are Lua scripts that compare the stored token
//! before acting, so a holder whose lease lapsed cannot delete or extend a
//! lock that now belongs to someone else.
//!
//! # Example
//!
//! ```no_run
//! use stockpile_redis::{RedisLockConfig, RedisLockStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLockStore::new(&RedisLockConfig::from_env()).await?;
//! # Ok(())
//! # }
//! ```

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use stockpile_core::lock::{LockError, LockStore};

type LockFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, LockError>> + Send + 'a>>;

/// Deletes the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// Resets the key's TTL only while it still holds the caller's token.
const EXTEND_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Connection settings for [`RedisLockStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisLockConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix prepended to every lock key.
    pub key_prefix: String,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "distributed_lock:".to_string(),
        }
    }
}

impl RedisLockConfig {
    /// Load from `REDIS_URL` and `REDIS_LOCK_KEY_PREFIX`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            key_prefix: std::env::var("REDIS_LOCK_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

/// Lock store on a single Redis node.
///
/// Cloning is cheap; clones share the connection manager and scripts.
#[derive(Clone)]
pub struct RedisLockStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    key_prefix: String,
    release_script: Arc<Script>,
    extend_script: Arc<Script>,
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisLockStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the URL is invalid or the connection fails.
    pub async fn new(config: &RedisLockConfig) -> Result<Self, LockError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            LockError::Backend(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(key_prefix = %config.key_prefix, "Connected Redis lock store");
        Ok(Self::from_connection_manager(
            conn_manager,
            config.key_prefix.clone(),
        ))
    }

    /// Build a store over an existing connection manager.
    #[must_use]
    pub fn from_connection_manager(
        conn_manager: ConnectionManager,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn_manager,
            key_prefix: key_prefix.into(),
            release_script: Arc::new(Script::new(RELEASE_SCRIPT)),
            extend_script: Arc::new(Script::new(EXTEND_SCRIPT)),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

/// Milliseconds for `PX`/`PEXPIRE`; Redis rejects a zero expiry.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl LockStore for RedisLockStore {
    fn try_acquire(&self, key: &str, lock_id: &str, ttl: Duration) -> LockFuture<'_> {
        let redis_key = self.redis_key(key);
        let lock_id = lock_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(&redis_key)
                .arg(&lock_id)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to acquire lock: {e}")))?;

            let acquired = reply.is_some();
            tracing::debug!(key = %redis_key, acquired, "SET NX PX");
            Ok(acquired)
        })
    }

    fn release(&self, key: &str, lock_id: &str) -> LockFuture<'_> {
        let redis_key = self.redis_key(key);
        let lock_id = lock_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .release_script
                .key(&redis_key)
                .arg(&lock_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to release lock: {e}")))?;

            tracing::debug!(key = %redis_key, released = deleted == 1, "Compare-and-delete");
            Ok(deleted == 1)
        })
    }

    fn extend(&self, key: &str, lock_id: &str, ttl: Duration) -> LockFuture<'_> {
        let redis_key = self.redis_key(key);
        let lock_id = lock_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let updated: i64 = self
                .extend_script
                .key(&redis_key)
                .arg(&lock_id)
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to extend lock: {e}")))?;

            tracing::debug!(key = %redis_key, extended = updated == 1, "Compare-and-pexpire");
            Ok(updated == 1)
        })
    }

    fn exists(&self, key: &str) -> LockFuture<'_> {
        let redis_key = self.redis_key(key);
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let exists: bool = conn.exists(&redis_key).await.map_err(|e| {
                LockError::Backend(format!("Failed to check lock existence: {e}"))
            })?;
            Ok(exists)
        })
    }
}
