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

//! Streaming upserts into Snowflake.
//!
//! Events sent to the queue are merged one at a time by the storage's
//! streaming worker, keyed on `user/id`. No stage is needed in stream mode.
//!
//! # Running
//!
//! ```bash
//! export SNOWFLAKE_ACCOUNT="xy12345.eu-central-1"
//! export SNOWFLAKE_DATABASE="ANALYTICS"
//! export SNOWFLAKE_TOKEN="eyJhbGciOi..."
//!
//! cargo run --example snowflake_stream
//! ```

use serde_json::json;
use stagehand_core::config::{DestinationMode, StorageConfig};
use stagehand_core::destination::Storage;
use stagehand_core::event::RawEvent;
use stagehand_core::storage::StorageContext;
use stagehand_destinations::snowflake::{new_snowflake, SnowflakeConfig, SnowflakeSettings};
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info,stagehand_core=debug")
        .init();

    let settings = SnowflakeSettings {
        storage: StorageConfig::builder()
            .destination_id("snowflake-stream")
            .mode(DestinationMode::Stream)
            .unique_id_field("user/id")
            .primary_key_fields(["user_id"])
            .build()?,
        snowflake: SnowflakeConfig::builder()
            .account(env::var("SNOWFLAKE_ACCOUNT")?)
            .database(env::var("SNOWFLAKE_DATABASE")?)
            .schema("STAGEHAND_STREAM")
            .token(env::var("SNOWFLAKE_TOKEN")?)
            .build()?,
        s3: None,
        gcs: None,
    };

    let (tx, rx) = mpsc::channel::<RawEvent>(100);
    let storage = new_snowflake(settings, StorageContext::local(), Some(rx)).await?;

    for (id, plan) in [(1, "free"), (2, "pro"), (1, "pro")] {
        let event = json!({"user": {"id": id}, "plan": plan});
        if let Some(event) = event.as_object() {
            tx.send(event.clone()).await?;
        }
    }
    drop(tx);

    // Give the worker a moment to drain the queue
    tokio::time::sleep(Duration::from_secs(5)).await;

    if let Some(stats) = storage.worker_stats().await {
        println!(
            "received={} succeeded={} failed={}",
            stats.events_received, stats.writes_succeeded, stats.writes_failed
        );
    }

    storage.close().await?;
    Ok(())
}
