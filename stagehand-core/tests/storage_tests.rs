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

//! Batch path, clean and close of `WarehouseStorage`.

use serde_json::{json, Value};
use stagehand_core::config::{StorageConfig, StorageConfigBuilder};
use stagehand_core::coordination::LocalCoordinator;
use stagehand_core::destination::{DestinationError, Storage};
use stagehand_core::event::RawEvent;
use stagehand_core::outcome::{MemoryOutcomeCache, OutcomeCache, OutcomeStatus};
use stagehand_core::processor::FlatProcessor;
use stagehand_core::schema::Table;
use stagehand_core::stage::MemoryStage;
use stagehand_core::storage::{StorageContext, WarehouseStorage};
use stagehand_core::warehouse::MockWarehouse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Fixture {
    storage: WarehouseStorage<MockWarehouse>,
    warehouse: MockWarehouse,
    stage: MemoryStage,
    outcomes: Arc<MemoryOutcomeCache>,
}

fn fixture(warehouse: MockWarehouse, stage: MemoryStage) -> Fixture {
    fixture_with(warehouse, stage, StorageConfig::builder().destination_id("dest"))
}

fn fixture_with(warehouse: MockWarehouse, stage: MemoryStage, config: StorageConfigBuilder) -> Fixture {
    let outcomes = Arc::new(MemoryOutcomeCache::default());
    let ctx = StorageContext::new(
        Arc::new(FlatProcessor::builder().table_name_field("table").build()),
        outcomes.clone(),
        Arc::new(LocalCoordinator::new()),
    );
    let storage = WarehouseStorage::new(
        config.build().unwrap(),
        ctx,
        Arc::new(warehouse.clone()),
        Some(Arc::new(stage.clone())),
        None,
    );
    Fixture {
        storage,
        warehouse,
        stage,
        outcomes,
    }
}

fn event(value: Value) -> RawEvent {
    value.as_object().unwrap().clone()
}

fn no_tables() -> HashSet<String> {
    HashSet::new()
}

#[tokio::test]
async fn test_store_single_file_into_default_table() {
    let warehouse = MockWarehouse::new();
    let stage = MemoryStage::new();
    let storage = WarehouseStorage::new(
        StorageConfig::builder().destination_id("dest").build().unwrap(),
        StorageContext::local(),
        Arc::new(warehouse.clone()),
        Some(Arc::new(stage.clone())),
        None,
    );

    let events = vec![event(json!({"t": "2024-01-01", "a": 1}))];
    let outcome = storage
        .store("f1.dat", &events, &no_tables(), false)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let events_outcome = &outcome.results["events"];
    assert!(events_outcome.is_success());
    assert_eq!(events_outcome.rows_count, 1);
    assert!(outcome.failed.unwrap().is_empty());
    assert!(outcome.skipped.is_empty());

    // Staged object was copied, then removed
    assert!(stage.is_empty());
    assert_eq!(stage.upload_count(), 1);
    let copies = warehouse.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].table, "events");
    assert_eq!(copies[0].header, vec!["a", "t"]);
    assert_eq!(stage.deletes(), vec![copies[0].staged_object.clone()]);

    let table = warehouse.table("events").unwrap();
    assert_eq!(table.columns["a"], "bigint");
    assert_eq!(table.columns["t"], "timestamp");
}

#[tokio::test]
async fn test_payload_has_header_and_pipe_delimited_rows() {
    let warehouse = MockWarehouse::new().with_copy_failure("events");
    let f = fixture(warehouse, MemoryStage::new());

    let events = vec![event(json!({"table": "events", "a": 1, "note": "x|y"}))];
    f.storage
        .store("f1.dat", &events, &no_tables(), false)
        .await
        .unwrap();

    // Copy failed, so the file is still staged and can be inspected
    let names = f.stage.object_names();
    assert_eq!(names.len(), 1);
    let payload = String::from_utf8(f.stage.object(&names[0]).unwrap()).unwrap();
    assert_eq!(payload, "a|note|table\n1|\"x|y\"|events\n");
}

#[tokio::test]
async fn test_tables_fail_independently() {
    let f = fixture(MockWarehouse::new().with_copy_failure("b"), MemoryStage::new());

    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": "b", "x": 2})),
        event(json!({"table": "b", "x": 3})),
    ];
    let outcome = f
        .storage
        .store("file", &events, &no_tables(), false)
        .await
        .unwrap();

    assert!(outcome.results["a"].is_success());
    let b = &outcome.results["b"];
    assert_eq!(b.rows_count, 2);
    assert!(matches!(b.error, Some(DestinationError::CopyError { .. })));
    assert!(b.error.as_ref().unwrap().is_retryable());
    assert_eq!(outcome.failed_tables(), vec!["b"]);

    // Only the successful table's object is deleted; the failed one stays
    assert_eq!(f.stage.deletes().len(), 1);
    let remaining = f.stage.object_names();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].starts_with("file_b_"));

    // Table a is loaded despite b failing
    assert_eq!(f.warehouse.copies().len(), 1);
    assert_eq!(f.warehouse.copies()[0].table, "a");
}

#[tokio::test]
async fn test_failed_events_held_back_when_a_table_fails() {
    let f = fixture(MockWarehouse::new().with_copy_failure("b"), MemoryStage::new());

    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": "b", "x": 2})),
        event(json!({"table": ["bad"], "x": 3})),
        event(json!({"table": "", "x": 4})),
    ];
    let outcome = f
        .storage
        .store("file", &events, &no_tables(), false)
        .await
        .unwrap();

    assert!(outcome.failed.is_none());
    assert_eq!(outcome.skipped.len(), 1);
}

#[tokio::test]
async fn test_failed_events_returned_when_every_table_loads() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());

    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": {"nested": 1}, "x": 3})),
    ];
    let outcome = f
        .storage
        .store("file", &events, &no_tables(), false)
        .await
        .unwrap();

    let failed = outcome.failed.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed.events[0].event["x"], json!(3));
}

#[tokio::test]
async fn test_upload_failure_never_copies() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new().with_upload_failures());

    let events = vec![event(json!({"table": "a", "x": 1}))];
    let outcome = f
        .storage
        .store("file", &events, &no_tables(), false)
        .await
        .unwrap();

    assert!(matches!(
        outcome.results["a"].error,
        Some(DestinationError::StageError { .. })
    ));
    assert!(f.warehouse.copies().is_empty());
    assert!(f.stage.deletes().is_empty());
}

#[tokio::test]
async fn test_delete_failure_does_not_fail_table() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new().with_delete_failures());

    let events = vec![event(json!({"table": "a", "x": 1}))];
    let outcome = f
        .storage
        .store("file", &events, &no_tables(), false)
        .await
        .unwrap();

    assert!(outcome.all_succeeded());
    assert_eq!(f.stage.deletes().len(), 1);
    assert_eq!(f.stage.object_names().len(), 1);
}

#[tokio::test]
async fn test_store_always_checks_backend() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());
    let events = vec![event(json!({"table": "a", "x": 1}))];

    f.storage.store("f1", &events, &no_tables(), false).await.unwrap();
    f.storage.store("f2", &events, &no_tables(), false).await.unwrap();

    assert_eq!(f.warehouse.get_table_calls(), 2);
    assert_eq!(f.warehouse.create_table_calls(), 1);
}

#[tokio::test]
async fn test_header_is_reconciled_order_of_batch_columns() {
    let existing = Table::new("a")
        .with_column("table", "text")
        .with_column("x", "bigint")
        .with_column("z", "text");
    let f = fixture(MockWarehouse::new().with_table(existing), MemoryStage::new());

    let events = vec![event(json!({"table": "a", "x": 1, "b": true}))];
    f.storage.store("f", &events, &no_tables(), false).await.unwrap();

    let copies = f.warehouse.copies();
    assert_eq!(copies[0].header, vec!["b", "table", "x"]);

    let table = f.warehouse.table("a").unwrap();
    assert_eq!(table.columns["b"], "boolean");
    assert_eq!(table.columns["z"], "text");
    assert_eq!(f.warehouse.add_columns_calls(), 1);
}

#[tokio::test]
async fn test_already_uploaded_tables_are_not_reloaded() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());
    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": "b", "x": 2})),
    ];
    let uploaded = HashSet::from(["a".to_string()]);

    let outcome = f.storage.store("f", &events, &uploaded, false).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results.contains_key("b"));
    assert_eq!(f.warehouse.copies().len(), 1);
}

#[tokio::test]
async fn test_outcomes_are_recorded_per_row() {
    let f = fixture(MockWarehouse::new().with_copy_failure("b"), MemoryStage::new());
    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": "a", "x": 2})),
        event(json!({"table": "b", "x": 3})),
        event(json!({"table": [1], "x": 4})),
        event(json!({"table": "", "x": 5})),
    ];

    f.storage.store("f", &events, &no_tables(), false).await.unwrap();

    // Rows of the failed table plus the event the processor rejected
    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Succeeded).await, 2);
    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Failed).await, 2);
    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Skipped).await, 1);

    let recent = f.outcomes.recent("dest", 10).await.unwrap();
    let success = recent
        .iter()
        .find(|r| r.status == OutcomeStatus::Succeeded)
        .unwrap();
    assert_eq!(success.table.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_caching_disabled_skips_success_records() {
    let f = fixture_with(
        MockWarehouse::new().with_copy_failure("b"),
        MemoryStage::new(),
        StorageConfig::builder()
            .destination_id("dest")
            .caching_disabled(true),
    );
    let events = vec![
        event(json!({"table": "a", "x": 1})),
        event(json!({"table": "b", "x": 2})),
        event(json!({"table": "", "x": 3})),
    ];

    f.storage.store("f", &events, &no_tables(), false).await.unwrap();

    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Succeeded).await, 0);
    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Failed).await, 1);
    assert_eq!(f.outcomes.count("dest", OutcomeStatus::Skipped).await, 1);
}

#[tokio::test]
async fn test_copy_events_report_original_event() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());
    let events = vec![event(json!({"table": "a", "user": {"id": 1}}))];

    f.storage.store("f", &events, &no_tables(), true).await.unwrap();

    let recent = f.outcomes.recent("dest", 1).await.unwrap();
    assert_eq!(recent[0].event["user"], json!({"id": 1}));
}

#[tokio::test]
async fn test_processor_error_aborts_store() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());
    let events = vec![event(json!({"table": "a", "x": 1}))];

    let err = f
        .storage
        .store("", &events, &no_tables(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, DestinationError::ProcessingError { .. }));
    assert_eq!(f.stage.upload_count(), 0);
}

#[tokio::test]
async fn test_store_without_stage_is_configuration_error() {
    let storage = WarehouseStorage::new(
        StorageConfig::builder().destination_id("dest").build().unwrap(),
        StorageContext::local(),
        Arc::new(MockWarehouse::new()),
        None,
        None,
    );

    let err = storage
        .store("f", &[], &no_tables(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DestinationError::ConfigurationError { .. }));
}

#[tokio::test]
async fn test_reconcile_failure_is_per_table() {
    let f = fixture_with(
        MockWarehouse::new(),
        MemoryStage::new(),
        StorageConfig::builder().destination_id("dest").max_columns(2),
    );
    let events = vec![
        event(json!({"table": "narrow", "x": 1})),
        event(json!({"table": "wide", "x": 1, "y": 2, "z": 3})),
    ];

    let outcome = f.storage.store("f", &events, &no_tables(), false).await.unwrap();

    assert!(outcome.results["narrow"].is_success());
    assert!(matches!(
        outcome.results["wide"].error,
        Some(DestinationError::ReconcileError { .. })
    ));
    assert_eq!(f.stage.upload_count(), 1);
}

#[tokio::test]
async fn test_clean_truncates_existing_table() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());
    let events = vec![event(json!({"table": "a", "x": 1}))];
    f.storage.store("f", &events, &no_tables(), false).await.unwrap();

    f.storage.clean("A").await.unwrap();
    f.storage.clean("missing").await.unwrap();

    assert_eq!(f.warehouse.truncated(), vec!["a"]);
    assert!(f.storage.core().reconciler().cached("dest", "a").await.is_none());
}

#[tokio::test]
async fn test_close_attempts_every_resource_and_collects_failures() {
    let f = fixture(
        MockWarehouse::new().with_close_failure(),
        MemoryStage::new().with_close_failure(),
    );

    let err = f.storage.close().await.unwrap_err();

    assert_eq!(err.destination_id, "dest");
    assert_eq!(err.len(), 2);
    let resources: Vec<&str> = err.failures.iter().map(|f| f.resource).collect();
    assert_eq!(resources, vec!["warehouse", "stage"]);
    assert!(err.to_string().contains("failed to close 2 resource(s)"));

    assert_eq!(f.warehouse.close_calls(), 1);
    assert_eq!(f.stage.close_calls(), 1);
}

#[tokio::test]
async fn test_close_joins_worker_before_failing_warehouse_and_stage() {
    let warehouse = MockWarehouse::new()
        .with_get_table_delay(Duration::from_millis(100))
        .with_close_failure();
    let stage = MemoryStage::new().with_close_failure();
    let outcomes = Arc::new(MemoryOutcomeCache::default());
    let (tx, rx) = mpsc::channel(16);

    let storage = WarehouseStorage::new(
        StorageConfig::builder()
            .destination_id("dest")
            .unique_id_field("id")
            .build()
            .unwrap(),
        StorageContext::new(
            Arc::new(FlatProcessor::builder().default_table("users").build()),
            outcomes.clone(),
            Arc::new(LocalCoordinator::new()),
        ),
        Arc::new(warehouse.clone()),
        Some(Arc::new(stage.clone())),
        Some(rx),
    );

    tx.send(event(json!({"id": 1}))).await.unwrap();
    // Let the worker start the write, then close while it is in flight
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = storage.close().await.unwrap_err();

    // Worker closed cleanly, warehouse and stage still attempted after it
    let resources: Vec<&str> = err.failures.iter().map(|f| f.resource).collect();
    assert_eq!(resources, vec!["warehouse", "stage"]);
    assert_eq!(warehouse.close_calls(), 1);
    assert_eq!(stage.close_calls(), 1);

    // The write landed before the warehouse session was closed
    assert_eq!(warehouse.rows("users").len(), 1);
    assert_eq!(outcomes.count("dest", OutcomeStatus::Succeeded).await, 1);
    assert_eq!(outcomes.count("dest", OutcomeStatus::Failed).await, 0);

    assert!(storage.worker_stats().await.is_none());
    assert!(tx.send(event(json!({"id": 2}))).await.is_err());
}

#[tokio::test]
async fn test_second_close_is_noop() {
    let f = fixture(MockWarehouse::new(), MemoryStage::new());

    f.storage.close().await.unwrap();
    f.storage.close().await.unwrap();

    assert!(f.storage.is_closed());
    assert_eq!(f.warehouse.close_calls(), 1);
    assert_eq!(f.stage.close_calls(), 1);
}

#[tokio::test]
async fn test_metadata() {
    let f = fixture_with(
        MockWarehouse::new(),
        MemoryStage::new(),
        StorageConfig::builder()
            .destination_id("dest")
            .unique_id_field("ctx/id"),
    );

    let metadata = f.storage.metadata();
    assert_eq!(metadata.id, "dest");
    assert_eq!(metadata.storage_type, "mock");
    assert_eq!(metadata.mode, "batch");
    assert_eq!(metadata.stage_type.as_deref(), Some("memory"));
    assert_eq!(metadata.properties["unique_id_field"], "ctx/id");
}
