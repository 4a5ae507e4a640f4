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

//! Integration tests for the Redis store.
//!
//! These start a Redis container and are ignored by default:
//!
//! ```bash
//! cargo test --package stagehand-stores --test redis_integration_test -- --ignored
//! ```

#![cfg(feature = "redis-store")]

use serde_json::json;
use stagehand_core::config::StorageConfig;
use stagehand_core::coordination::{acquire_with_timeout, Coordinator, CoordinatorError};
use stagehand_core::destination::Storage;
use stagehand_core::event::RawEvent;
use stagehand_core::outcome::{OutcomeCache, OutcomeStatus};
use stagehand_core::processor::FlatProcessor;
use stagehand_core::stage::MemoryStage;
use stagehand_core::storage::{StorageContext, WarehouseStorage};
use stagehand_core::warehouse::MockWarehouse;
use stagehand_stores::redis::{RedisConfig, RedisStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;

/// Starts Redis and connects a store to it. Keep the container alive for
/// the duration of the test.
async fn start_store(capacity: usize) -> (ContainerAsync<Redis>, RedisStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start Redis container");

    let host_port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get port");

    let config = RedisConfig::builder()
        .url(format!("redis://127.0.0.1:{host_port}"))
        .pool_size(5)
        .outcome_capacity(capacity)
        .build()
        .expect("valid config");

    let store = RedisStore::new(config)
        .await
        .expect("failed to create store");
    (container, store)
}

fn event(id: i64) -> RawEvent {
    json!({"id": id}).as_object().cloned().unwrap_or_default()
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_lock_is_exclusive_per_owner() {
    let (_container, store) = start_store(10).await;
    let ttl = Duration::from_secs(30);

    assert!(store.try_acquire_lock("dest_users", "a", ttl).await.unwrap());
    assert!(!store.try_acquire_lock("dest_users", "b", ttl).await.unwrap());
    assert!(store.is_locked("dest_users").await.unwrap());

    // Only the owner can release
    assert!(!store.release_lock("dest_users", "b").await.unwrap());
    assert!(store.release_lock("dest_users", "a").await.unwrap());
    assert!(!store.is_locked("dest_users").await.unwrap());

    assert!(store.try_acquire_lock("dest_users", "b", ttl).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_lock_expires() {
    let (_container, store) = start_store(10).await;

    assert!(store
        .try_acquire_lock("dest_events", "a", Duration::from_millis(100))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!store.is_locked("dest_events").await.unwrap());
    assert!(store
        .try_acquire_lock("dest_events", "b", Duration::from_secs(5))
        .await
        .unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_acquire_with_timeout_gives_up() {
    let (_container, store) = start_store(10).await;
    store
        .try_acquire_lock("busy", "holder", Duration::from_secs(30))
        .await
        .unwrap();

    let result = acquire_with_timeout(
        &store,
        "busy",
        "waiter",
        Duration::from_secs(30),
        Duration::from_millis(200),
    )
    .await;

    assert!(matches!(result, Err(CoordinatorError::Timeout { .. })));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_outcomes_are_capped_newest_first() {
    let (_container, store) = start_store(3).await;

    for id in 1..=5 {
        store.record_success("dest", event(id), "events").await.unwrap();
    }
    store
        .record_error("other", event(9), "boom")
        .await
        .unwrap();

    let recent = store.recent("dest", 10).await.unwrap();
    let ids: Vec<i64> = recent
        .iter()
        .filter_map(|r| r.event.get("id").and_then(serde_json::Value::as_i64))
        .collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert!(recent.iter().all(|r| r.status == OutcomeStatus::Succeeded));

    let other = store.recent("other", 10).await.unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].reason.as_deref(), Some("boom"));

    assert!(store.recent("dest", 0).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_storage_with_redis_context() {
    let (_container, store) = start_store(100).await;
    let store = Arc::new(store);
    let warehouse = MockWarehouse::new();

    let storage = WarehouseStorage::new(
        StorageConfig::builder()
            .destination_id("redis-dest")
            .build()
            .unwrap(),
        StorageContext::new(
            Arc::new(FlatProcessor::default()),
            store.clone(),
            store.clone(),
        ),
        Arc::new(warehouse.clone()),
        Some(Arc::new(MemoryStage::new())),
        None,
    );

    let events = vec![event(1), event(2)];
    let outcome = storage
        .store("redis.dat", &events, &HashSet::new(), false)
        .await
        .unwrap();
    assert!(outcome.all_succeeded());

    // Schema lock was released after reconciliation
    assert!(!store.is_locked("redis-dest_events").await.unwrap());
    assert_eq!(store.recent("redis-dest", 10).await.unwrap().len(), 2);

    storage.close().await.unwrap();
}
