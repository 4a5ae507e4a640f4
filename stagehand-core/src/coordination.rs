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

//! Mutual exclusion for schema changes.
//!
//! Several processes may load into the same warehouse. Any of them can find
//! that a table lacks a column, and two of them issuing the same
//! `ALTER TABLE` concurrently is an error on most backends. The schema
//! reconciler therefore holds a [`Coordinator`] lock named
//! `"{destination_id}_{table}"` while it reads and alters a table.
//!
//! [`LocalCoordinator`] serializes DDL inside one process. Multi-process
//! deployments use the Redis-backed store from `stagehand-stores`.

use crate::metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Error type for coordination and outcome-cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Backend could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock was not acquired in time
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout {
        /// Lock key
        key: String,
        /// How long we waited
        waited: Duration,
    },

    /// Other errors
    #[error("Coordinator error: {0}")]
    Other(String),
}

/// Distributed lock service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Tries to take the lock `key` for `owner_id` without waiting.
    ///
    /// The lock expires after `ttl` if it is never released.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Lock acquired
    /// * `Ok(false)` - Lock held by another owner
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn try_acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError>;

    /// Releases the lock if `owner_id` holds it.
    ///
    /// Returns `Ok(false)` if the lock was not held by this owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn release_lock(&self, key: &str, owner_id: &str) -> Result<bool, CoordinatorError>;

    /// Returns `true` if anyone holds the lock. The answer may be stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError>;

    /// Releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be closed cleanly.
    async fn close(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}

/// Polls [`Coordinator::try_acquire_lock`] until it succeeds or `wait`
/// elapses.
///
/// Backoff starts at 10ms and doubles up to 500ms between attempts.
///
/// # Errors
///
/// Returns [`CoordinatorError::Timeout`] if the lock stays taken, or the
/// backend error if an attempt fails.
pub async fn acquire_with_timeout(
    coordinator: &dyn Coordinator,
    key: &str,
    owner_id: &str,
    ttl: Duration,
    wait: Duration,
) -> Result<(), CoordinatorError> {
    let start = Instant::now();
    let mut delay = Duration::from_millis(10);

    loop {
        if coordinator.try_acquire_lock(key, owner_id, ttl).await? {
            metrics::increment_lock_acquisitions();
            return Ok(());
        }

        let waited = start.elapsed();
        if waited >= wait {
            metrics::increment_lock_failures();
            return Err(CoordinatorError::Timeout {
                key: key.to_string(),
                waited,
            });
        }

        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Lock busy, retrying");
        tokio::time::sleep(delay.min(wait.saturating_sub(waited))).await;
        delay = (delay * 2).min(Duration::from_millis(500));
    }
}

/// In-process coordinator.
///
/// Locks are kept in a map of key to (owner, expiry). Expired locks are
/// treated as free. A held lock is not re-entrant, not even for its owner,
/// matching `SET NX` semantics of the Redis store.
#[derive(Debug, Clone, Default)]
pub struct LocalCoordinator {
    locks: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl LocalCoordinator {
    /// Creates a coordinator with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) locks.
    pub async fn held(&self) -> usize {
        let now = Instant::now();
        self.locks
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    async fn try_acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let now = Instant::now();
        let mut locks = self.locks.write().await;

        match locks.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), (owner_id.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str, owner_id: &str) -> Result<bool, CoordinatorError> {
        let mut locks = self.locks.write().await;
        match locks.get(key) {
            Some((owner, _)) if owner == owner_id => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError> {
        let now = Instant::now();
        Ok(self
            .locks
            .read()
            .await
            .get(key)
            .is_some_and(|(_, expires)| *expires > now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let coordinator = LocalCoordinator::new();
        let ttl = Duration::from_secs(30);

        assert!(coordinator.try_acquire_lock("k", "a", ttl).await.unwrap());
        assert!(!coordinator.try_acquire_lock("k", "b", ttl).await.unwrap());
        // Not re-entrant, even for the holder
        assert!(!coordinator.try_acquire_lock("k", "a", ttl).await.unwrap());
        assert!(coordinator.is_locked("k").await.unwrap());
        assert_eq!(coordinator.held().await, 1);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let coordinator = LocalCoordinator::new();
        let ttl = Duration::from_secs(30);

        coordinator.try_acquire_lock("k", "a", ttl).await.unwrap();
        assert!(!coordinator.release_lock("k", "b").await.unwrap());
        assert!(coordinator.release_lock("k", "a").await.unwrap());
        assert!(!coordinator.is_locked("k").await.unwrap());
        assert!(coordinator.try_acquire_lock("k", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_is_free() {
        let coordinator = LocalCoordinator::new();

        coordinator
            .try_acquire_lock("k", "a", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!coordinator.is_locked("k").await.unwrap());
        assert!(coordinator
            .try_acquire_lock("k", "b", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_acquire_with_timeout() {
        let coordinator = LocalCoordinator::new();
        let ttl = Duration::from_secs(30);

        acquire_with_timeout(&coordinator, "k", "a", ttl, Duration::from_millis(50))
            .await
            .unwrap();

        let err = acquire_with_timeout(&coordinator, "k", "b", ttl, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let coordinator = LocalCoordinator::new();
        let ttl = Duration::from_secs(30);
        coordinator.try_acquire_lock("k", "a", ttl).await.unwrap();

        let releaser = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            releaser.release_lock("k", "a").await.unwrap();
        });

        acquire_with_timeout(&coordinator, "k", "b", ttl, Duration::from_secs(2))
            .await
            .unwrap();
    }
}
