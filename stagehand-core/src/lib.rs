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

//! Stagehand Core - warehouse loading traits, data model and orchestration
//!
//! This crate holds everything a warehouse destination needs apart from the
//! network clients themselves, which live in `stagehand-destinations`.
//!
//! # Key Components
//!
//! - **Events**: [`event`] raw events and the failed/skipped partitions
//! - **Schema**: [`schema`] type inference, identifier normalization, tables
//! - **Processing**: [`processor`] flattening raw events into table batches
//! - **Backends**: [`warehouse`] and [`stage`] adapter traits
//! - **Reconciliation**: [`reconcile`] creating and widening tables
//! - **Orchestration**: [`storage`] the batch path, `update`, `clean`, `close`
//! - **Streaming**: [`worker`] per-destination queue drain
//! - **Shared state**: [`coordination`] schema locks, [`outcome`] event outcomes
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::config::StorageConfig;
//! use stagehand_core::destination::Storage;
//! use stagehand_core::stage::MemoryStage;
//! use stagehand_core::storage::{StorageContext, WarehouseStorage};
//! use stagehand_core::warehouse::MockWarehouse;
//! use serde_json::json;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = WarehouseStorage::new(
//!     StorageConfig::builder().destination_id("demo").build()?,
//!     StorageContext::local(),
//!     Arc::new(MockWarehouse::new()),
//!     Some(Arc::new(MemoryStage::new())),
//!     None,
//! );
//!
//! let events = vec![json!({"t": "2024-01-01", "a": 1}).as_object().unwrap().clone()];
//! let outcome = storage.store("f1.dat", &events, &HashSet::new(), false).await?;
//! assert_eq!(outcome.results["events"].rows_count, 1);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod coordination;
pub mod destination;
pub mod event;
pub mod metrics;
pub mod outcome;
pub mod processor;
pub mod reconcile;
pub mod schema;
pub mod stage;
pub mod storage;
pub mod warehouse;
pub mod wire;
pub mod worker;
