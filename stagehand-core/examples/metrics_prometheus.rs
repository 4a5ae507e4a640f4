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

//! Prometheus Metrics Exporter Example
//!
//! This example demonstrates how to expose Stagehand metrics to Prometheus.
//! It loads a few files through the in-memory warehouse and serves the
//! resulting metrics.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p stagehand-core --example metrics_prometheus
//! ```
//!
//! # Viewing Metrics
//!
//! While the example is running, metrics are exposed at:
//! - http://localhost:9000/metrics
//!
//! # Prometheus Configuration
//!
//! Add this to your `prometheus.yml`:
//! ```yaml
//! scrape_configs:
//!   - job_name: 'stagehand'
//!     static_configs:
//!       - targets: ['localhost:9000']
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use stagehand_core::config::StorageConfig;
use stagehand_core::destination::Storage;
use stagehand_core::event::RawEvent;
use stagehand_core::metrics;
use stagehand_core::stage::MemoryStage;
use stagehand_core::storage::{StorageContext, WarehouseStorage};
use stagehand_core::warehouse::MockWarehouse;
use std::collections::HashSet;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let prometheus_addr: SocketAddr = ([0, 0, 0, 0], 9000).into();
    PrometheusBuilder::new()
        .with_http_listener(prometheus_addr)
        .install()?;
    metrics::init_metrics();
    info!("📊 Prometheus metrics available at http://localhost:9000/metrics");

    let warehouse = MockWarehouse::new();
    let storage = WarehouseStorage::new(
        StorageConfig::builder().destination_id("metrics-demo").build()?,
        StorageContext::local(),
        Arc::new(warehouse),
        Some(Arc::new(MemoryStage::new())),
        None,
    );

    for i in 0..10 {
        let events: Vec<RawEvent> = (0..100)
            .filter_map(|n| json!({"seq": i * 100 + n, "at": "2024-01-01T00:00:00Z"}).as_object().cloned())
            .collect();
        let outcome = storage
            .store(&format!("file-{i:04}"), &events, &HashSet::new(), false)
            .await?;
        info!(file = i, tables = outcome.results.len(), "Stored file");
    }

    info!("📈 Available metrics:");
    info!("   - stagehand_rows_loaded_total");
    info!("   - stagehand_tables_failed_total");
    info!("   - stagehand_schema_reconciliations_total");
    info!("   - stagehand_copy_duration_seconds");
    info!("   - stagehand_stage_upload_bytes");
    info!("🛑 Press Ctrl+C to stop...");

    signal::ctrl_c().await?;
    storage.close().await?;

    // Leave time for a final scrape
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Initialize structured logging
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stagehand_core=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .init();
}
