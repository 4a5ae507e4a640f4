// Copyright 2025 Stagehand Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Redis-backed coordinator and outcome cache for multi-process deployments.
//!
//! [`RedisStore`] implements both [`Coordinator`] and [`OutcomeCache`], so
//! one pool serves schema locks and event outcomes for every destination of
//! a process.
//!
//! # Example
//!
//! ```rust,no_run
//! use stagehand_core::processor::FlatProcessor;
//! use stagehand_core::storage::StorageContext;
//! use stagehand_stores::redis::{RedisConfig, RedisStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .pool_size(10)
//!     .build()?;
//!
//! let store = Arc::new(RedisStore::new(config).await?);
//! let ctx = StorageContext::new(
//!     Arc::new(FlatProcessor::default()),
//!     store.clone(),
//!     store,
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Key Pattern
//!
//! ```text
//! stagehand:lock:{lock_key}
//! stagehand:outcomes:{destination_id}
//! ```
//!
//! Locks are plain string keys set with `NX` and a millisecond expiry, whose
//! value is the owner id. Outcomes are a capped list per destination, newest
//! first.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::{RedisError, Script};
use stagehand_core::coordination::{Coordinator, CoordinatorError};
use stagehand_core::outcome::{OutcomeCache, OutcomeRecord, DEFAULT_CAPACITY};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Key prefix of schema locks.
const LOCK_PREFIX: &str = "stagehand:lock";

/// Key prefix of outcome lists.
const OUTCOME_PREFIX: &str = "stagehand:outcomes";

/// Maximum number of retry attempts for transient Redis errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Deletes the lock only if `owner` still holds it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Configuration for [`RedisStore`].
///
/// # Example
///
/// ```rust
/// use stagehand_stores::redis::RedisConfig;
/// use std::time::Duration;
///
/// let config = RedisConfig::builder()
///     .url("redis://localhost:6379")
///     .pool_size(15)
///     .outcome_capacity(500)
///     .outcome_ttl(Duration::from_secs(86400))
///     .build()
///     .expect("valid config");
/// ```
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Connection pool size (default: 10)
    pub pool_size: usize,

    /// Connection timeout (default: 5 seconds)
    pub connection_timeout: Duration,

    /// Maximum number of retries for transient errors (default: 3)
    pub max_retries: u32,

    /// Outcome records kept per destination (default: 100)
    pub outcome_capacity: usize,

    /// Expiry of a destination's outcome list after its last write
    pub outcome_ttl: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            max_retries: MAX_RETRIES,
            outcome_capacity: DEFAULT_CAPACITY,
            outcome_ttl: None,
        }
    }
}

impl RedisConfig {
    /// Creates a new builder for `RedisConfig`.
    #[must_use]
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::default()
    }
}

/// Builder for [`RedisConfig`] with validation.
#[derive(Debug, Default)]
pub struct RedisConfigBuilder {
    url: Option<String>,
    pool_size: Option<usize>,
    connection_timeout: Option<Duration>,
    max_retries: Option<u32>,
    outcome_capacity: Option<usize>,
    outcome_ttl: Option<Duration>,
}

impl RedisConfigBuilder {
    /// Sets the Redis connection URL.
    ///
    /// # Formats
    ///
    /// - Standalone: `redis://localhost:6379`
    /// - With auth: `redis://:password@localhost:6379`
    /// - With database: `redis://localhost:6379/0`
    /// - TLS: `rediss://localhost:6380`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the connection pool size.
    ///
    /// Default: 10
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the connection timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of retries for transient errors.
    ///
    /// Default: 3
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets how many outcome records are kept per destination.
    ///
    /// Default: 100
    #[must_use]
    pub fn outcome_capacity(mut self, capacity: usize) -> Self {
        self.outcome_capacity = Some(capacity);
        self
    }

    /// Expires a destination's outcome list after `ttl` without writes.
    #[must_use]
    pub fn outcome_ttl(mut self, ttl: Duration) -> Self {
        self.outcome_ttl = Some(ttl);
        self
    }

    /// Builds the `RedisConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - URL is not provided
    /// - Pool size is 0
    /// - Outcome capacity is 0
    pub fn build(self) -> Result<RedisConfig, CoordinatorError> {
        let url = self
            .url
            .ok_or_else(|| CoordinatorError::Other("Redis URL is required".to_string()))?;

        let pool_size = self.pool_size.unwrap_or(10);
        if pool_size == 0 {
            return Err(CoordinatorError::Other(
                "Pool size must be greater than 0".to_string(),
            ));
        }

        let outcome_capacity = self.outcome_capacity.unwrap_or(DEFAULT_CAPACITY);
        if outcome_capacity == 0 {
            return Err(CoordinatorError::Other(
                "Outcome capacity must be greater than 0".to_string(),
            ));
        }

        Ok(RedisConfig {
            url,
            pool_size,
            connection_timeout: self.connection_timeout.unwrap_or(Duration::from_secs(5)),
            max_retries: self.max_retries.unwrap_or(MAX_RETRIES),
            outcome_capacity,
            outcome_ttl: self.outcome_ttl,
        })
    }
}

/// Redis-backed lock service and outcome cache.
///
/// `RedisStore` is `Send + Sync` and cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    config: RedisConfig,
}

impl RedisStore {
    /// Creates a new `RedisStore` and checks connectivity with `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or Redis does not
    /// answer.
    pub async fn new(config: RedisConfig) -> Result<Self, CoordinatorError> {
        debug!(url = %config.url, pool_size = config.pool_size, "Initializing Redis store");

        let mut pool_config = PoolConfig::from_url(&config.url);
        if let Some(pool) = pool_config.pool.as_mut() {
            pool.max_size = config.pool_size;
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
        } else {
            let mut pool = deadpool_redis::PoolConfig::new(config.pool_size);
            pool.timeouts.wait = Some(config.connection_timeout);
            pool.timeouts.create = Some(config.connection_timeout);
            pool.timeouts.recycle = Some(config.connection_timeout);
            pool_config.pool = Some(pool);
        }

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                error!(error = %e, "Failed to create Redis connection pool");
                CoordinatorError::Connection(format!("Failed to create pool: {e}"))
            })?;

        let mut conn = pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get connection from pool");
            CoordinatorError::Connection(format!("Failed to connect to Redis: {e}"))
        })?;

        redis::cmd("PING")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Redis PING failed");
                CoordinatorError::Connection(format!("Redis connection test failed: {e}"))
            })?;

        debug!("Redis store initialized");
        Ok(Self { pool, config })
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn lock_key(key: &str) -> String {
        format!("{LOCK_PREFIX}:{key}")
    }

    fn outcome_key(destination_id: &str) -> String {
        format!("{OUTCOME_PREFIX}:{destination_id}")
    }

    async fn connection(pool: &Pool) -> Result<Connection, RedisError> {
        pool.get().await.map_err(|e| {
            RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get connection from pool",
                e.to_string(),
            ))
        })
    }

    /// Executes a Redis operation with retry logic for transient errors.
    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, CoordinatorError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::is_retryable(&e) && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = Duration::from_millis(BASE_RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    warn!(
                        attempt = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Redis operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(retries, error = %e, "Redis operation failed");
                    return Err(CoordinatorError::Connection(format!(
                        "Redis operation failed: {e}"
                    )));
                }
            }
        }
    }

    /// Determines if a Redis error is retryable.
    fn is_retryable(error: &RedisError) -> bool {
        error.is_io_error()
            || error.is_connection_dropped()
            || error.is_timeout()
            || matches!(error.kind(), redis::ErrorKind::TryAgain | redis::ErrorKind::BusyLoadingError)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl Coordinator for RedisStore {
    async fn try_acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let key = Self::lock_key(key);
        let ttl_ms = Self::ttl_millis(ttl);
        let pool = &self.pool;

        let reply: Option<String> = self
            .with_retry(|| async {
                let mut conn = Self::connection(pool).await?;
                redis::cmd("SET")
                    .arg(&key)
                    .arg(owner_id)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut *conn)
                    .await
            })
            .await?;

        let acquired = reply.is_some();
        debug!(key = %key, owner_id = %owner_id, acquired, "Tried Redis lock");
        Ok(acquired)
    }

    async fn release_lock(&self, key: &str, owner_id: &str) -> Result<bool, CoordinatorError> {
        let key = Self::lock_key(key);
        let script = Script::new(RELEASE_SCRIPT);
        let pool = &self.pool;

        let deleted: i64 = self
            .with_retry(|| async {
                let mut conn = Self::connection(pool).await?;
                script.key(&key).arg(owner_id).invoke_async(&mut *conn).await
            })
            .await?;

        if deleted == 0 {
            warn!(key = %key, owner_id = %owner_id, "Lock was not held by this owner");
        }
        Ok(deleted > 0)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError> {
        let key = Self::lock_key(key);
        let pool = &self.pool;

        self.with_retry(|| async {
            let mut conn = Self::connection(pool).await?;
            redis::cmd("EXISTS").arg(&key).query_async(&mut *conn).await
        })
        .await
    }

    async fn close(&self) -> Result<(), CoordinatorError> {
        debug!("Closing Redis store");
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl OutcomeCache for RedisStore {
    async fn record(
        &self,
        destination_id: &str,
        record: OutcomeRecord,
    ) -> Result<(), CoordinatorError> {
        let key = Self::outcome_key(destination_id);
        let value = serde_json::to_string(&record)
            .map_err(|e| CoordinatorError::Serialization(format!("Failed to encode outcome: {e}")))?;
        let last = isize::try_from(self.config.outcome_capacity).unwrap_or(isize::MAX) - 1;
        let ttl_ms = self.config.outcome_ttl.map(Self::ttl_millis);
        let pool = &self.pool;

        self.with_retry::<_, (), _>(|| async {
            let mut conn = Self::connection(pool).await?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("LPUSH")
                .arg(&key)
                .arg(&value)
                .ignore()
                .cmd("LTRIM")
                .arg(&key)
                .arg(0)
                .arg(last)
                .ignore();
            if let Some(ttl_ms) = ttl_ms {
                pipe.cmd("PEXPIRE").arg(&key).arg(ttl_ms).ignore();
            }
            pipe.query_async(&mut *conn).await
        })
        .await
    }

    async fn recent(
        &self,
        destination_id: &str,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, CoordinatorError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = Self::outcome_key(destination_id);
        let last = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let pool = &self.pool;

        let values: Vec<String> = self
            .with_retry(|| async {
                let mut conn = Self::connection(pool).await?;
                redis::cmd("LRANGE")
                    .arg(&key)
                    .arg(0)
                    .arg(last)
                    .query_async(&mut *conn)
                    .await
            })
            .await?;

        values
            .iter()
            .map(|value| {
                serde_json::from_str(value).map_err(|e| {
                    CoordinatorError::Serialization(format!("Failed to decode outcome: {e}"))
                })
            })
            .collect()
    }
}
