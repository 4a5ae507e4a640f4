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

//! Metrics instrumentation for warehouse destinations.
//!
//! Everything goes through the `metrics` facade, so any exporter works
//! (Prometheus, StatsD, ...). Without an installed recorder every call is a
//! no-op.
//!
//! # Naming
//!
//! Names are prefixed with `stagehand_`, counters end with `_total` and
//! histograms carry their unit (`_seconds`, `_bytes`).
//!
//! # Labels
//!
//! - **destination_id**: configured destination (low cardinality)
//! - **table**: destination table (bounded by the schema)
//! - **error_type**: [`ErrorCategory`]
//! - **status**: `success` / `failure`
//!
//! Never label with event ids, timestamps or error messages.
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::metrics;
//! use std::time::Duration;
//!
//! metrics::increment_rows_loaded(150, "snowflake-prod", "events");
//! metrics::record_copy_duration(Duration::from_millis(420), "snowflake-prod");
//!
//! {
//!     let _timer = metrics::Timer::new("snowflake-prod", |duration, dest| {
//!         metrics::record_upsert_duration(duration, dest);
//!     });
//!     // ... do the upsert ...
//! }
//! ```

use crate::destination::DestinationError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

#[doc(hidden)]
pub const METRIC_PREFIX: &str = "stagehand";

#[doc(hidden)]
pub const ROWS_LOADED_TOTAL: &str = "stagehand_rows_loaded_total";

const TABLES_FAILED_TOTAL: &str = "stagehand_tables_failed_total";

const EVENTS_FAILED_TOTAL: &str = "stagehand_events_failed_total";

const EVENTS_SKIPPED_TOTAL: &str = "stagehand_events_skipped_total";

#[doc(hidden)]
pub const STREAM_WRITES_TOTAL: &str = "stagehand_stream_writes_total";

const COPY_DURATION_SECONDS: &str = "stagehand_copy_duration_seconds";

const UPSERT_DURATION_SECONDS: &str = "stagehand_upsert_duration_seconds";

const STAGE_UPLOAD_BYTES: &str = "stagehand_stage_upload_bytes";

const SCHEMA_RECONCILIATIONS_TOTAL: &str = "stagehand_schema_reconciliations_total";

const LOCK_ACQUISITIONS_TOTAL: &str = "stagehand_lock_acquisitions_total";

const LOCK_ACQUISITION_FAILURES_TOTAL: &str = "stagehand_lock_acquisition_failures_total";

const ACTIVE_STREAMING_WORKERS: &str = "stagehand_active_streaming_workers";

/// Registers descriptions for every metric.
///
/// Call once after installing a recorder.
pub fn init_metrics() {
    describe_counter!(
        ROWS_LOADED_TOTAL,
        "Total number of rows loaded into destination tables by bulk copy"
    );

    describe_counter!(
        TABLES_FAILED_TOTAL,
        "Total number of per-table batch loads that failed"
    );

    describe_counter!(
        EVENTS_FAILED_TOTAL,
        "Total number of events the processor could not handle"
    );

    describe_counter!(
        EVENTS_SKIPPED_TOTAL,
        "Total number of events the processor skipped"
    );

    describe_counter!(
        STREAM_WRITES_TOTAL,
        "Total number of single-row writes attempted by streaming workers"
    );

    describe_counter!(
        SCHEMA_RECONCILIATIONS_TOTAL,
        "Total number of table reconciliations that reached the backend"
    );

    describe_counter!(
        LOCK_ACQUISITIONS_TOTAL,
        "Total number of schema locks acquired"
    );

    describe_counter!(
        LOCK_ACQUISITION_FAILURES_TOTAL,
        "Total number of schema lock acquisitions that timed out"
    );

    describe_histogram!(
        COPY_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by bulk copy statements"
    );

    describe_histogram!(
        UPSERT_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by single-row upserts"
    );

    describe_histogram!(
        STAGE_UPLOAD_BYTES,
        metrics::Unit::Bytes,
        "Size of payloads uploaded to the stage (compressed if applicable)"
    );

    describe_gauge!(
        ACTIVE_STREAMING_WORKERS,
        metrics::Unit::Count,
        "Number of streaming workers currently running"
    );
}

/// Adds rows loaded into a table by one bulk copy.
pub fn increment_rows_loaded(count: usize, destination_id: &str, table: &str) {
    counter!(
        ROWS_LOADED_TOTAL,
        "destination_id" => destination_id.to_string(),
        "table" => table.to_string()
    )
    .increment(count as u64);
}

/// Counts a table whose batch failed to load.
pub fn increment_tables_failed(destination_id: &str, error_category: ErrorCategory) {
    counter!(
        TABLES_FAILED_TOTAL,
        "destination_id" => destination_id.to_string(),
        "error_type" => error_category.as_str()
    )
    .increment(1);
}

/// Counts events the processor could not handle.
pub fn increment_events_failed(count: usize, destination_id: &str) {
    counter!(EVENTS_FAILED_TOTAL, "destination_id" => destination_id.to_string())
        .increment(count as u64);
}

/// Counts events the processor skipped.
pub fn increment_events_skipped(count: usize, destination_id: &str) {
    counter!(EVENTS_SKIPPED_TOTAL, "destination_id" => destination_id.to_string())
        .increment(count as u64);
}

/// Counts one streaming write by outcome.
pub fn increment_stream_writes(destination_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        STREAM_WRITES_TOTAL,
        "destination_id" => destination_id.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Counts a reconciliation that reached the backend.
pub fn increment_schema_reconciliations(destination_id: &str) {
    counter!(SCHEMA_RECONCILIATIONS_TOTAL, "destination_id" => destination_id.to_string())
        .increment(1);
}

/// Counts an acquired schema lock.
pub fn increment_lock_acquisitions() {
    counter!(LOCK_ACQUISITIONS_TOTAL).increment(1);
}

/// Counts a schema lock acquisition that timed out.
pub fn increment_lock_failures() {
    counter!(LOCK_ACQUISITION_FAILURES_TOTAL).increment(1);
}

/// Records the duration of a bulk copy.
pub fn record_copy_duration(duration: Duration, destination_id: &str) {
    histogram!(COPY_DURATION_SECONDS, "destination_id" => destination_id.to_string())
        .record(duration.as_secs_f64());
}

/// Records the duration of a single-row upsert.
pub fn record_upsert_duration(duration: Duration, destination_id: &str) {
    histogram!(UPSERT_DURATION_SECONDS, "destination_id" => destination_id.to_string())
        .record(duration.as_secs_f64());
}

/// Records the size of an uploaded payload.
pub fn record_stage_upload_bytes(bytes: usize, stage_type: &str) {
    histogram!(STAGE_UPLOAD_BYTES, "stage_type" => stage_type.to_string()).record(bytes as f64);
}

/// Marks a streaming worker as started.
pub fn increment_active_streaming_workers() {
    gauge!(ACTIVE_STREAMING_WORKERS).increment(1.0);
}

/// Marks a streaming worker as stopped.
pub fn decrement_active_streaming_workers() {
    gauge!(ACTIVE_STREAMING_WORKERS).decrement(1.0);
}

/// Error categories used as the `error_type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network or session failure
    Connection,
    /// Payload could not be encoded
    Serialization,
    /// Table could not be created or altered
    Schema,
    /// Upload to or delete from the stage failed
    Stage,
    /// Bulk copy or row write failed
    Write,
    /// Invalid configuration
    Configuration,
    /// Unclassified
    Unknown,
}

impl ErrorCategory {
    /// Returns the error category as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection_error",
            Self::Serialization => "serialization_error",
            Self::Schema => "schema_error",
            Self::Stage => "stage_error",
            Self::Write => "write_error",
            Self::Configuration => "configuration_error",
            Self::Unknown => "unknown_error",
        }
    }
}

impl From<&DestinationError> for ErrorCategory {
    fn from(error: &DestinationError) -> Self {
        match error {
            DestinationError::ConnectionError { .. } => Self::Connection,
            DestinationError::SerializationError { .. } => Self::Serialization,
            DestinationError::SchemaMissing { .. }
            | DestinationError::ReconcileError { .. }
            | DestinationError::SchemaMismatch { .. } => Self::Schema,
            DestinationError::StageError { .. } => Self::Stage,
            DestinationError::CopyError { .. } | DestinationError::WriteError { .. } => Self::Write,
            DestinationError::ConfigurationError { .. } => Self::Configuration,
            DestinationError::ProcessingError { .. } | DestinationError::Other { .. } => {
                Self::Unknown
            }
        }
    }
}

/// Drop guard that records elapsed time.
///
/// The callback receives the elapsed duration and the label given to
/// [`Timer::new`].
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Creates a new timer that will record the duration when dropped.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}
