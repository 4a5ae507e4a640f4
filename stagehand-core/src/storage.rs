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

//! Storage orchestration over a warehouse and a stage.
//!
//! [`WarehouseStorage`] implements [`Storage`] for any [`Warehouse`]. The
//! parts every warehouse shares (processor, schema reconciler, outcome
//! cache, identity field) live in [`StorageCore`]; the concrete
//! destination only contributes the warehouse session and, in batch mode,
//! a [`Stage`].
//!
//! # Batch path
//!
//! 1. The processor splits the file into per-table batches plus failed and
//!    skipped events, which are recorded in the outcome cache right away.
//! 2. Each table is reconciled against the backend, serialized, uploaded,
//!    copied and, once the copy succeeded, deleted from the stage.
//! 3. Tables succeed or fail independently. Failed events are only handed
//!    back when every table loaded, because a failed table makes the caller
//!    retry the whole file.
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
//! let config = StorageConfig::builder().destination_id("local").build()?;
//! let storage = WarehouseStorage::new(
//!     config,
//!     StorageContext::local(),
//!     Arc::new(MockWarehouse::new()),
//!     Some(Arc::new(MemoryStage::new())),
//!     None,
//! );
//!
//! let events = vec![json!({"a": 1}).as_object().unwrap().clone()];
//! let outcome = storage.store("f1.dat", &events, &HashSet::new(), false).await?;
//! assert!(outcome.all_succeeded());
//!
//! storage.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::batch::{ProcessedBatch, StoreOutcome, WriteOutcome};
use crate::config::StorageConfig;
use crate::coordination::{Coordinator, LocalCoordinator};
use crate::destination::{CloseError, CloseFailure, DestinationError, Storage, StorageMetadata};
use crate::event::{FailedEvents, RawEvent, SkippedEvents};
use crate::metrics::{self, ErrorCategory};
use crate::outcome::{MemoryOutcomeCache, OutcomeCache};
use crate::processor::{FlatProcessor, Processor, ProcessorError};
use crate::reconcile::SchemaReconciler;
use crate::schema::{normalize_identifier, normalize_row, Table};
use crate::stage::Stage;
use crate::warehouse::Warehouse;
use crate::worker::{EventWriter, StreamingWorker, WorkerStats, WriteResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Collaborators a storage is built with.
#[derive(Clone)]
pub struct StorageContext {
    /// Turns raw events into batches and envelopes
    pub processor: Arc<dyn Processor>,
    /// Where event outcomes are recorded
    pub outcomes: Arc<dyn OutcomeCache>,
    /// Lock service serializing DDL
    pub coordinator: Arc<dyn Coordinator>,
}

impl StorageContext {
    /// Creates a context from explicit collaborators.
    #[must_use]
    pub fn new(
        processor: Arc<dyn Processor>,
        outcomes: Arc<dyn OutcomeCache>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        Self {
            processor,
            outcomes,
            coordinator,
        }
    }

    /// Single-process context: [`FlatProcessor`], [`MemoryOutcomeCache`]
    /// and [`LocalCoordinator`].
    #[must_use]
    pub fn local() -> Self {
        Self::new(
            Arc::new(FlatProcessor::default()),
            Arc::new(MemoryOutcomeCache::default()),
            Arc::new(LocalCoordinator::new()),
        )
    }
}

/// Behavior shared by every warehouse destination.
///
/// Also the [`EventWriter`] of the streaming worker.
pub struct StorageCore<W: Warehouse> {
    config: StorageConfig,
    processor: Arc<dyn Processor>,
    outcomes: Arc<dyn OutcomeCache>,
    reconciler: SchemaReconciler<W>,
}

impl<W: Warehouse> StorageCore<W> {
    /// Creates the shared core for one warehouse session.
    #[must_use]
    pub fn new(config: StorageConfig, ctx: StorageContext, warehouse: Arc<W>) -> Self {
        let reconciler = SchemaReconciler::new(warehouse, ctx.coordinator, &config);
        Self {
            config,
            processor: ctx.processor,
            outcomes: ctx.outcomes,
            reconciler,
        }
    }

    /// Destination configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Schema reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &SchemaReconciler<W> {
        &self.reconciler
    }

    fn warehouse(&self) -> &W {
        self.reconciler.warehouse()
    }

    fn destination_id(&self) -> &str {
        &self.config.destination_id
    }

    /// Upserts one event into every table the processor routes it to.
    ///
    /// An event the processor drops is reported as
    /// [`WriteResult::Skipped`] and touches nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if processing, reconciliation or the upsert fails,
    /// or if the event has no unique id.
    pub async fn update(&self, object: &RawEvent) -> Result<WriteResult, DestinationError> {
        let envelopes = match self.processor.process_event(object, true) {
            Ok(envelopes) => envelopes,
            Err(ProcessorError::Skipped(reason)) => return Ok(WriteResult::Skipped(reason)),
            Err(e) => return Err(e.into()),
        };

        let id_field = self.config.unique_id_field.as_ref().ok_or_else(|| {
            DestinationError::configuration(
                "updates require a unique id field",
                Some("unique_id_field".to_string()),
            )
        })?;
        let id_value = id_field.extract(object).ok_or_else(|| {
            DestinationError::write_msg(
                format!("event has no value for unique id field '{id_field}'"),
                false,
            )
        })?;

        let mut written = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let desired = self.reconciler.map_to_table(&envelope.schema);
            let table = self
                .reconciler
                .ensure_table(self.destination_id(), &desired, true)
                .await?;

            let mut row = normalize_row(&envelope.row);
            row.entry(id_field.flat_name().to_string())
                .or_insert_with(|| id_value.clone());

            let result = {
                let _timer = metrics::Timer::new(self.destination_id(), |duration, dest| {
                    metrics::record_upsert_duration(duration, dest);
                });
                self.warehouse()
                    .upsert(&table, &row, id_field.flat_name())
                    .await
            };

            if let Err(e) = result {
                if e.is_schema_mismatch() {
                    warn!(
                        destination_id = %self.destination_id(),
                        table = %table.name,
                        "Column missing in warehouse, dropping cached table"
                    );
                    self.reconciler
                        .invalidate(self.destination_id(), &table.name)
                        .await;
                }
                return Err(e);
            }

            written.push(table.name);
        }

        Ok(WriteResult::Written(written))
    }

    async fn record_rejected(&self, failed: &FailedEvents, skipped: &SkippedEvents) {
        let dest = self.destination_id();
        for failed in &failed.events {
            if let Err(e) = self
                .outcomes
                .record_error(dest, failed.event.clone(), &failed.reason)
                .await
            {
                warn!(destination_id = %dest, error = %e, "Failed to record failed event");
            }
        }
        for skipped in &skipped.events {
            if let Err(e) = self
                .outcomes
                .record_skip(dest, skipped.event.clone(), &skipped.reason)
                .await
            {
                warn!(destination_id = %dest, error = %e, "Failed to record skipped event");
            }
        }
    }

    async fn record_batch(&self, batch: &ProcessedBatch, table: &str, error: Option<&DestinationError>) {
        let dest = self.destination_id();
        if error.is_none() && self.config.caching_disabled {
            return;
        }

        let reason = error.map(ToString::to_string);
        for index in 0..batch.row_count() {
            let event = batch.reportable_event(index);
            let recorded = match &reason {
                None => self.outcomes.record_success(dest, event, table).await,
                Some(reason) => self.outcomes.record_error(dest, event, reason).await,
            };
            if let Err(e) = recorded {
                warn!(destination_id = %dest, table = %table, error = %e, "Failed to record outcome");
            }
        }
    }
}

#[async_trait]
impl<W: Warehouse> EventWriter for StorageCore<W> {
    async fn write(&self, event: &RawEvent) -> Result<WriteResult, DestinationError> {
        self.update(event).await
    }
}

/// [`Storage`] over a warehouse session and an optional stage.
pub struct WarehouseStorage<W: Warehouse> {
    core: Arc<StorageCore<W>>,
    storage_type: &'static str,
    stage: Option<Arc<dyn Stage>>,
    worker: Mutex<Option<StreamingWorker>>,
    closed: AtomicBool,
}

impl<W: Warehouse> WarehouseStorage<W> {
    /// Assembles a storage.
    ///
    /// `stage` enables [`Storage::store`]. `queue` starts a streaming worker
    /// that drains it through [`Storage::update`]; it must be called inside
    /// a tokio runtime when a queue is given.
    #[must_use]
    pub fn new(
        config: StorageConfig,
        ctx: StorageContext,
        warehouse: Arc<W>,
        stage: Option<Arc<dyn Stage>>,
        queue: Option<mpsc::Receiver<RawEvent>>,
    ) -> Self {
        let storage_type = warehouse.warehouse_type();
        let outcomes = Arc::clone(&ctx.outcomes);
        let core = Arc::new(StorageCore::new(config, ctx, warehouse));

        let worker = queue.map(|queue| {
            StreamingWorker::spawn(
                core.config.destination_id.clone(),
                queue,
                Arc::clone(&core) as Arc<dyn EventWriter>,
                outcomes,
                core.config.caching_disabled,
            )
        });

        info!(
            destination_id = %core.config.destination_id,
            storage_type = storage_type,
            mode = %core.config.mode,
            stage = stage.as_ref().map(|s| s.stage_type()),
            streaming = worker.is_some(),
            "Storage initialized"
        );

        Self {
            core,
            storage_type,
            stage,
            worker: Mutex::new(worker),
            closed: AtomicBool::new(false),
        }
    }

    /// Shared core.
    #[must_use]
    pub fn core(&self) -> &StorageCore<W> {
        &self.core
    }

    /// Counters of the streaming worker, if one is running.
    pub async fn worker_stats(&self) -> Option<WorkerStats> {
        match self.worker.lock().await.as_ref() {
            Some(worker) => Some(worker.stats().await),
            None => None,
        }
    }

    /// Returns `true` once [`Storage::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Loads one table. Errors are per table and never abort the file.
    #[instrument(skip_all, fields(table = %desired.name, file_name = %batch.file_name, rows = batch.row_count()))]
    async fn store_table(
        &self,
        stage: &dyn Stage,
        batch: &ProcessedBatch,
        desired: &Table,
    ) -> Result<(), DestinationError> {
        let dest = self.core.destination_id();
        let reconciled = self
            .core
            .reconciler
            .ensure_table(dest, desired, false)
            .await?;

        // Reconciled order, restricted to the columns this batch carries.
        let header: Vec<String> = reconciled
            .column_names()
            .into_iter()
            .filter(|column| desired.columns.contains_key(column))
            .collect();

        let payload = batch.payload_with_header(&header)?;
        let size = payload.len();
        stage.upload_bytes(&batch.file_name, payload).await?;
        metrics::record_stage_upload_bytes(size, stage.stage_type());
        debug!(bytes = size, "Uploaded batch to stage");

        let started = Instant::now();
        let copied = self
            .core
            .warehouse()
            .copy(&batch.file_name, &reconciled.name, &header)
            .await;
        metrics::record_copy_duration(started.elapsed(), dest);
        copied.map_err(|e| DestinationError::copy(&batch.file_name, &reconciled.name, e))?;

        if let Err(e) = stage.delete_object(&batch.file_name).await {
            warn!(error = %e, "Failed to delete staged object after copy");
        }

        Ok(())
    }
}

#[async_trait]
impl<W: Warehouse> Storage for WarehouseStorage<W> {
    fn id(&self) -> &str {
        self.core.destination_id()
    }

    fn storage_type(&self) -> &str {
        self.storage_type
    }

    #[instrument(skip(self, objects, already_uploaded), fields(destination_id = %self.id(), events = objects.len()))]
    async fn store(
        &self,
        file_name: &str,
        objects: &[RawEvent],
        already_uploaded: &HashSet<String>,
        need_copy_event: bool,
    ) -> Result<StoreOutcome, DestinationError> {
        let Some(stage) = &self.stage else {
            return Err(DestinationError::configuration(
                format!("[{}] has no stage configured, store is not available", self.id()),
                None,
            ));
        };

        let processed = self.core.processor.process_events(
            file_name,
            objects,
            already_uploaded,
            need_copy_event,
        )?;

        metrics::increment_events_failed(processed.failed.len(), self.id());
        metrics::increment_events_skipped(processed.skipped.len(), self.id());
        self.core
            .record_rejected(&processed.failed, &processed.skipped)
            .await;

        let mut results = HashMap::with_capacity(processed.batches.len());
        for batch in &processed.batches {
            let desired = self.core.reconciler.map_to_table(&batch.schema);
            let result = self.store_table(stage.as_ref(), batch, &desired).await;

            match &result {
                Ok(()) => {
                    metrics::increment_rows_loaded(batch.row_count(), self.id(), &desired.name);
                    info!(table = %desired.name, rows = batch.row_count(), "Loaded table");
                }
                Err(e) => {
                    metrics::increment_tables_failed(self.id(), ErrorCategory::from(e));
                    error!(table = %desired.name, rows = batch.row_count(), error = %e, "Failed to load table");
                }
            }
            self.core
                .record_batch(batch, &desired.name, result.as_ref().err())
                .await;

            results.insert(
                desired.name,
                WriteOutcome {
                    rows_count: batch.row_count(),
                    events_per_source: batch.events_per_source.clone(),
                    error: result.err(),
                },
            );
        }

        let all_succeeded = results.values().all(WriteOutcome::is_success);
        if !all_succeeded && !processed.failed.is_empty() {
            debug!(
                failed_events = processed.failed.len(),
                "Holding back failed events until every table loads"
            );
        }

        Ok(StoreOutcome {
            results,
            failed: all_succeeded.then_some(processed.failed),
            skipped: processed.skipped,
        })
    }

    async fn update(&self, object: &RawEvent) -> Result<(), DestinationError> {
        if let WriteResult::Skipped(reason) = self.core.update(object).await? {
            debug!(destination_id = %self.id(), reason = %reason, "Skipped event");
            metrics::increment_events_skipped(1, self.id());
            if let Err(e) = self
                .core
                .outcomes
                .record_skip(self.id(), object.clone(), &reason)
                .await
            {
                warn!(destination_id = %self.id(), error = %e, "Failed to record skipped event");
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(destination_id = %self.id()))]
    async fn clean(&self, table: &str) -> Result<(), DestinationError> {
        let name = normalize_identifier(table);
        if self.core.warehouse().get_table(&name).await?.is_some() {
            self.core.warehouse().truncate(&name).await?;
            info!(table = %name, "Truncated table");
        } else {
            debug!(table = %name, "Table does not exist, nothing to clean");
        }
        self.core.reconciler.invalidate(self.id(), &name).await;
        Ok(())
    }

    #[instrument(skip(self), fields(destination_id = %self.id()))]
    async fn close(&self) -> Result<(), CloseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Storage already closed");
            return Ok(());
        }

        let mut failures = Vec::new();

        if let Some(mut worker) = self.worker.lock().await.take() {
            if let Err(error) = worker.close().await {
                failures.push(CloseFailure {
                    resource: "streaming worker",
                    error,
                });
            }
        }

        if let Err(error) = self.core.warehouse().close().await {
            failures.push(CloseFailure {
                resource: "warehouse",
                error,
            });
        }

        if let Some(stage) = &self.stage {
            if let Err(error) = stage.close().await {
                failures.push(CloseFailure {
                    resource: "stage",
                    error,
                });
            }
        }

        if failures.is_empty() {
            info!("Storage closed");
            return Ok(());
        }

        let err = CloseError {
            destination_id: self.id().to_string(),
            failures,
        };
        error!(error = %err, "Storage closed with errors");
        Err(err)
    }

    fn metadata(&self) -> StorageMetadata {
        let config = &self.core.config;
        let mut metadata = StorageMetadata::new(self.id(), self.storage_type, config.mode.as_str());
        if let Some(stage) = &self.stage {
            metadata = metadata.with_stage_type(stage.stage_type());
        }
        if let Some(field) = &config.unique_id_field {
            metadata = metadata.with_property("unique_id_field", field.to_string());
        }
        if let Some(max) = config.max_columns {
            metadata = metadata.with_property("max_columns", max.to_string());
        }
        metadata
    }
}
