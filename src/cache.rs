//! Result cache for math operations.
//!
//! Keys are `"<operation>:<input JSON>"`; `serde_json` objects serialize
//! with sorted keys, so equal inputs always map to the same key. Values
//! are stored as JSON text with a TTL.

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),
}

/// A string key/value cache with expiry.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// [`ResultCache`] on Redis `GET` / `SET EX`.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        conn.get(key)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }
}

pub fn cache_key(operation: &str, input: &Value) -> String {
    format!("{operation}:{input}")
}

/// Return the cached value for `(operation, input)` or compute and store it.
///
/// Cache failures are logged and never fail the computation.
pub async fn cache_or_compute<T, E, F>(
    cache: &dyn ResultCache,
    operation: &str,
    input: &Value,
    ttl: Duration,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, E>,
{
    let key = cache_key(operation, input);

    match cache.get(&key).await {
        Ok(Some(cached)) => match serde_json::from_str(&cached) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                return Ok(value);
            }
            Err(e) => warn!(key = %key, error = %e, "Unreadable cache entry, recomputing"),
        },
        Ok(None) => debug!(key = %key, "Cache miss"),
        Err(e) => warn!(key = %key, error = %e, "Cache lookup failed"),
    }

    let value = compute()?;

    match serde_json::to_string(&value) {
        Ok(text) => {
            if let Err(e) = cache.set(&key, &text, ttl).await {
                warn!(key = %key, error = %e, "Cache store failed");
            }
        }
        Err(e) => warn!(key = %key, error = %e, "Result not cacheable"),
    }

    Ok(value)
}
