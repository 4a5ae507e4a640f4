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

//! Batch load into Snowflake through an S3 stage.
//!
//! # Prerequisites
//!
//! - A Snowflake account and a key-pair JWT or OAuth token
//! - An S3 bucket the Snowflake account can read (static keys or a
//!   storage integration)
//!
//! # Running
//!
//! ```bash
//! export SNOWFLAKE_ACCOUNT="xy12345.eu-central-1"
//! export SNOWFLAKE_DATABASE="ANALYTICS"
//! export SNOWFLAKE_WAREHOUSE="LOADING"
//! export SNOWFLAKE_TOKEN="eyJhbGciOi..."
//! export S3_BUCKET="your-bucket-name"
//!
//! cargo run --example snowflake_s3
//! ```

use serde_json::json;
use stagehand_core::config::StorageConfig;
use stagehand_core::destination::Storage;
use stagehand_core::event::RawEvent;
use stagehand_core::processor::FlatProcessor;
use stagehand_core::storage::StorageContext;
use stagehand_destinations::s3::S3Config;
use stagehand_destinations::snowflake::{new_snowflake, SnowflakeConfig, SnowflakeSettings};
use std::collections::HashSet;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Snowflake batch load via S3 ===\n");

    let snowflake = SnowflakeConfig::builder()
        .account(env::var("SNOWFLAKE_ACCOUNT")?)
        .database(env::var("SNOWFLAKE_DATABASE")?)
        .warehouse(env::var("SNOWFLAKE_WAREHOUSE")?)
        .schema("STAGEHAND_EXAMPLES")
        .token(env::var("SNOWFLAKE_TOKEN")?)
        .build()?;

    let s3 = S3Config::builder()
        .bucket(env::var("S3_BUCKET")?)
        .folder("stagehand/examples")
        .build()?;

    println!("Configuration:");
    println!("  Account: {}", snowflake.account);
    println!("  Database: {}", snowflake.database);
    println!("  Schema: {}", snowflake.schema);
    println!("  Bucket: {}\n", s3.bucket);

    let ctx = StorageContext {
        processor: Arc::new(
            FlatProcessor::builder()
                .table_name_field("event_type")
                .build(),
        ),
        ..StorageContext::local()
    };

    let storage = new_snowflake(
        SnowflakeSettings {
            storage: StorageConfig::builder()
                .destination_id("snowflake-example")
                .build()?,
            snowflake,
            s3: Some(s3),
            gcs: None,
        },
        ctx,
        None,
    )
    .await?;

    let metadata = storage.metadata();
    println!("Storage: {} ({}, {})", metadata.id, metadata.storage_type, metadata.mode);

    let events: Vec<RawEvent> = vec![
        sample(json!({"event_type": "pageview", "url": "/", "user": {"id": 1}})),
        sample(json!({"event_type": "pageview", "url": "/pricing", "user": {"id": 2}})),
        sample(json!({"event_type": "signup", "plan": "pro", "user": {"id": 2}})),
    ];

    println!("Loading {} events...", events.len());
    let outcome = storage
        .store("example_batch.dat", &events, &HashSet::new(), false)
        .await?;

    for (table, result) in &outcome.results {
        match &result.error {
            None => println!("  ✓ {table}: {} rows", result.rows_count),
            Some(e) => println!("  ✗ {table}: {e}"),
        }
    }

    storage.close().await?;
    println!("\n✓ Storage closed");

    Ok(())
}

fn sample(value: serde_json::Value) -> RawEvent {
    value.as_object().cloned().unwrap_or_default()
}
