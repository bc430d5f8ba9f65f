//! Redis cache client.
//!
//! The cache is optional: every operation is bounded by a timeout and callers
//! treat errors as "cache unavailable" rather than failing the request.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

pub const EVICTION_POLICY: &str = "allkeys-lru";
pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected PING reply: {0}")]
    UnexpectedReply(String),

    #[error("Cached value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Memory and key statistics reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_used: String,
    pub keys: u64,
    pub max_memory: String,
    pub eviction_policy: String,
    pub default_ttl_secs: u64,
}

/// Clones share one lazily established connection. A failed connect leaves
/// the slot empty so the next call tries again.
#[derive(Clone)]
pub struct CacheClient {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    max_memory: String,
    ttl: Duration,
    timeout: Duration,
}

impl CacheClient {
    pub fn open(url: &str, max_memory: impl Into<String>) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
            max_memory: max_memory.into(),
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expiry applied by `put_json`. Zero is ignored.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.ttl = ttl;
        }
        self
    }

    pub fn max_memory(&self) -> &str {
        &self.max_memory
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| self.bounded(ConnectionManager::new(self.client.clone())))
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    /// Single liveness probe. No retry.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let reply: String = self
            .bounded(redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await?;
        if reply != "PONG" {
            return Err(CacheError::UnexpectedReply(reply));
        }
        debug!("Redis PING ok");
        Ok(())
    }

    /// Applies the memory ceiling and eviction policy. Managed Redis
    /// instances usually reject CONFIG; callers decide how loud to be.
    pub async fn configure_memory(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(
            redis::cmd("CONFIG")
                .arg("SET")
                .arg("maxmemory")
                .arg(&self.max_memory)
                .query_async::<_, ()>(&mut conn),
        )
        .await?;
        self.bounded(
            redis::cmd("CONFIG")
                .arg("SET")
                .arg("maxmemory-policy")
                .arg(EVICTION_POLICY)
                .query_async::<_, ()>(&mut conn),
        )
        .await?;
        Ok(())
    }

    /// Stores `value` as JSON under `key`, expiring after the client TTL.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;
        self.bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn),
        )
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = self
            .bounded(redis::cmd("GET").arg(key).query_async::<_, Option<String>>(&mut conn))
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(CacheError::from))
            .transpose()
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut conn = self.connection().await?;
        let info: String = self
            .bounded(redis::cmd("INFO").arg("memory").query_async::<_, String>(&mut conn))
            .await?;
        let keys: u64 = self
            .bounded(redis::cmd("DBSIZE").query_async::<_, u64>(&mut conn))
            .await?;
        Ok(CacheStats {
            memory_used: info_field(&info, "used_memory_human")
                .unwrap_or("Unknown")
                .to_string(),
            keys,
            max_memory: self.max_memory.clone(),
            eviction_policy: EVICTION_POLICY.to_string(),
            default_ttl_secs: self.ttl.as_secs(),
        })
    }
}

/// Extracts `field` from a Redis INFO reply (`key:value` lines).
fn info_field<'a>(info: &'a str, field: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        (key == field).then_some(value.trim())
    })
}
