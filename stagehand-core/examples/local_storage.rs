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

//! Local Storage Example
//!
//! Loads a small file through the batch path and streams a few updates,
//! using the in-memory warehouse and stage. No external services needed.
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=stagehand_core=debug cargo run -p stagehand-core --example local_storage
//! ```

use serde_json::json;
use stagehand_core::config::StorageConfig;
use stagehand_core::coordination::LocalCoordinator;
use stagehand_core::destination::Storage;
use stagehand_core::event::RawEvent;
use stagehand_core::outcome::{MemoryOutcomeCache, OutcomeCache};
use stagehand_core::processor::FlatProcessor;
use stagehand_core::stage::MemoryStage;
use stagehand_core::storage::{StorageContext, WarehouseStorage};
use stagehand_core::warehouse::MockWarehouse;
use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let warehouse = MockWarehouse::new();
    let outcomes = Arc::new(MemoryOutcomeCache::default());
    let ctx = StorageContext::new(
        Arc::new(
            FlatProcessor::builder()
                .table_name_field("event_type")
                .build(),
        ),
        outcomes.clone(),
        Arc::new(LocalCoordinator::new()),
    );

    let config = StorageConfig::builder()
        .destination_id("local")
        .unique_id_field("user/id")
        .build()?;

    let (tx, rx) = mpsc::channel::<RawEvent>(100);
    let storage = WarehouseStorage::new(
        config,
        ctx,
        Arc::new(warehouse.clone()),
        Some(Arc::new(MemoryStage::new())),
        Some(rx),
    );

    // Batch path: one file fanning out to two tables
    let events: Vec<RawEvent> = [
        json!({"event_type": "pageview", "url": "/", "user": {"id": 1}}),
        json!({"event_type": "pageview", "url": "/docs", "user": {"id": 2}}),
        json!({"event_type": "signup", "plan": "free", "user": {"id": 2}}),
        json!({"url": "/orphan"}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect();

    let outcome = storage
        .store("batch-0001.log", &events, &HashSet::new(), false)
        .await?;

    for (table, result) in &outcome.results {
        info!(table = %table, rows = result.rows_count, ok = result.is_success(), "Table result");
    }
    info!(skipped = outcome.skipped.len(), "Skipped events");

    // Streaming path: upserts keyed by user/id
    for plan in ["pro", "enterprise"] {
        let event = json!({"event_type": "profile", "plan": plan, "user": {"id": 2}});
        if let Some(event) = event.as_object().cloned() {
            tx.send(event).await?;
        }
    }
    drop(tx);

    while let Some(stats) = storage.worker_stats().await {
        if stats.events_received == 2 && stats.writes_succeeded + stats.writes_failed == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    info!(rows = ?warehouse.rows("profile"), "Profile table");
    for record in outcomes.recent("local", 10).await? {
        info!(status = ?record.status, table = ?record.table, "Recent outcome");
    }

    if let Err(e) = storage.close().await {
        tracing::error!(error = %e, "Close failed");
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stagehand_core=info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
