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

//! Storage trait and error types.
//!
//! This module defines the [`Storage`] trait every warehouse destination
//! exposes to the rest of the system, and the [`DestinationError`] taxonomy
//! shared by backend adapters, stage adapters and the orchestrator.
//!
//! # Architecture
//!
//! A destination is constructed once and lives for the whole process. It
//! offers four operations:
//!
//! - [`Storage::store`]: batch path. Processes a file of raw events, loads each
//!   resulting table through the object stage, and reports per-table outcomes.
//! - [`Storage::update`]: single-row upsert used by the streaming path.
//! - [`Storage::clean`]: truncates a destination table.
//! - [`Storage::close`]: tears down every owned resource exactly once.
//!
//! # Error Handling
//!
//! [`DestinationError`] classifies failures by where they happened:
//! - [`DestinationError::ConfigurationError`]: invalid settings (non-retryable)
//! - [`DestinationError::ConnectionError`]: backend unreachable (retryable)
//! - [`DestinationError::SchemaMissing`]: the configured schema does not exist
//! - [`DestinationError::ReconcileError`]: table create/alter failed
//! - [`DestinationError::StageError`]: object upload or delete failed
//! - [`DestinationError::CopyError`]: bulk copy from the stage failed
//! - [`DestinationError::WriteError`]: single-row write failed
//! - [`DestinationError::SchemaMismatch`]: write referenced an unknown column
//!
//! Closing aggregates failures into [`CloseError`] instead of stopping at the
//! first one.
//!
//! # Example
//!
//! ```rust,no_run
//! use stagehand_core::destination::{DestinationError, Storage};
//! use stagehand_core::event::RawEvent;
//! use std::collections::HashSet;
//!
//! # async fn example(storage: impl Storage, events: Vec<RawEvent>) -> Result<(), DestinationError> {
//! let outcome = storage
//!     .store("batch-0001.log", &events, &HashSet::new(), false)
//!     .await?;
//!
//! for (table, result) in &outcome.results {
//!     match &result.error {
//!         None => println!("{table}: {} rows", result.rows_count),
//!         Some(e) => println!("{table}: failed: {e}"),
//!     }
//! }
//!
//! if let Err(close_error) = storage.close().await {
//!     eprintln!("{close_error}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::batch::StoreOutcome;
use crate::event::RawEvent;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised while loading data into a destination.
#[derive(Error, Debug)]
pub enum DestinationError {
    /// Connection to the backend failed.
    ///
    /// Typically retryable after a backoff period (timeouts, refused
    /// connections, throttling).
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Human-readable error message
        message: String,
        /// The underlying connection error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The configured schema does not exist on the backend.
    ///
    /// Raised by connectors so the bootstrap protocol can create it.
    #[error("Schema '{schema}' does not exist or is not authorized: {message}")]
    SchemaMissing {
        /// Schema name
        schema: String,
        /// Backend message
        message: String,
    },

    /// Failed to serialize rows for staging.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
        /// The underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The destination table could not be created or altered.
    #[error("Schema reconciliation failed for table '{table}': {message}")]
    ReconcileError {
        /// Table name
        table: String,
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Uploading or deleting a staged object failed.
    #[error("Stage error for object '{object}': {message}")]
    StageError {
        /// Staged object name
        object: String,
        /// Human-readable error message
        message: String,
        /// Whether retrying may succeed
        retryable: bool,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bulk copy of a staged object into a table failed.
    #[error("Error copying file [{object}] from stage into table '{table}': {message}")]
    CopyError {
        /// Staged object name
        object: String,
        /// Target table
        table: String,
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single-row write failed.
    #[error("Write error: {message}")]
    WriteError {
        /// Human-readable error message
        message: String,
        /// Whether this specific write error is retryable
        retryable: bool,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A write referenced a column the backend does not know.
    ///
    /// The cached table definition is stale; the next write re-reconciles.
    #[error("Schema mismatch on table '{table}': {message}")]
    SchemaMismatch {
        /// Table name
        table: String,
        /// Backend message
        message: String,
    },

    /// The upstream processor rejected the input.
    #[error("Processing error: {message}")]
    ProcessingError {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid destination configuration.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Human-readable error message
        message: String,
        /// Configuration parameter name if applicable
        parameter: Option<String>,
    },

    /// A generic error occurred.
    #[error("Destination error: {message}")]
    Other {
        /// Human-readable error message
        message: String,
        /// Whether this error is retryable
        retryable: bool,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DestinationError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ConnectionError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a schema-missing error.
    #[must_use]
    pub fn schema_missing(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMissing {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error from any error type.
    #[must_use]
    pub fn serialization(
        source: impl std::error::Error + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a reconcile error wrapping a lower-level failure.
    #[must_use]
    pub fn reconcile(table: impl Into<String>, source: Self) -> Self {
        Self::ReconcileError {
            table: table.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a reconcile error with a custom message.
    #[must_use]
    pub fn reconcile_msg(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReconcileError {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a stage error from any error type.
    #[must_use]
    pub fn stage(
        object: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
        retryable: bool,
    ) -> Self {
        Self::StageError {
            object: object.into(),
            message: source.to_string(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a stage error with a custom message.
    #[must_use]
    pub fn stage_msg(object: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::StageError {
            object: object.into(),
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Wraps a backend failure that happened while copying a staged object.
    #[must_use]
    pub fn copy(object: impl Into<String>, table: impl Into<String>, source: Self) -> Self {
        Self::CopyError {
            object: object.into(),
            table: table.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a write error with retryability information.
    #[must_use]
    pub fn write(source: impl std::error::Error + Send + Sync + 'static, retryable: bool) -> Self {
        Self::WriteError {
            message: source.to_string(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a write error with a custom message.
    #[must_use]
    pub fn write_msg(message: impl Into<String>, retryable: bool) -> Self {
        Self::WriteError {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Creates a schema mismatch error.
    #[must_use]
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a processing error from any error type.
    #[must_use]
    pub fn processing(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ProcessingError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>, parameter: Option<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            parameter,
        }
    }

    /// Creates a generic error.
    #[must_use]
    pub fn other(source: impl std::error::Error + Send + Sync + 'static, retryable: bool) -> Self {
        Self::Other {
            message: source.to_string(),
            retryable,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a generic error with a custom message.
    #[must_use]
    pub fn other_msg(message: impl Into<String>, retryable: bool) -> Self {
        Self::Other {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Returns whether this error is retryable.
    ///
    /// Copy and reconcile errors inherit retryability from the failure they
    /// wrap; schema problems are retryable because the next attempt
    /// re-reconciles.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError { .. } | Self::SchemaMismatch { .. } => true,
            Self::SerializationError { .. }
            | Self::ConfigurationError { .. }
            | Self::SchemaMissing { .. }
            | Self::ProcessingError { .. } => false,
            Self::StageError { retryable, .. }
            | Self::WriteError { retryable, .. }
            | Self::Other { retryable, .. } => *retryable,
            Self::ReconcileError { source, .. } | Self::CopyError { source, .. } => source
                .as_deref()
                .and_then(|s| s.downcast_ref::<Self>())
                .is_some_and(Self::is_retryable),
        }
    }

    /// Returns `true` if the write failed because of an unknown column.
    #[must_use]
    pub const fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }
}

/// A resource that failed to close.
#[derive(Debug)]
pub struct CloseFailure {
    /// Which resource failed ("streaming worker", "warehouse", "stage")
    pub resource: &'static str,
    /// What went wrong
    pub error: DestinationError,
}

/// Every failure encountered while closing a destination, in close order.
///
/// Closing never stops at the first failure; each owned resource is
/// attempted and all failures end up here.
#[derive(Debug, Error)]
#[error(
    "[{destination_id}] failed to close {} resource(s){}",
    .failures.len(),
    describe_failures(.failures)
)]
pub struct CloseError {
    /// Destination that was being closed
    pub destination_id: String,
    /// Failures in the order they happened
    pub failures: Vec<CloseFailure>,
}

impl CloseError {
    /// Number of resources that failed to close.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` if no resource failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn describe_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("; error closing {}: {}", f.resource, f.error))
        .collect()
}

/// Metadata describing a destination instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMetadata {
    /// Destination identifier
    pub id: String,

    /// Destination type identifier (e.g., "snowflake")
    pub storage_type: String,

    /// Delivery mode ("batch" or "stream")
    pub mode: String,

    /// Stage backend type, if a stage is configured
    pub stage_type: Option<String>,

    /// Additional destination-specific metadata
    pub properties: HashMap<String, String>,
}

impl StorageMetadata {
    /// Creates new metadata with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, storage_type: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage_type: storage_type.into(),
            mode: mode.into(),
            stage_type: None,
            properties: HashMap::new(),
        }
    }

    /// Sets the stage type.
    #[must_use]
    pub fn with_stage_type(mut self, stage_type: impl Into<String>) -> Self {
        self.stage_type = Some(stage_type.into());
        self
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Uniform write interface of a warehouse destination.
///
/// Implementations must be `Send + Sync`: the batch path and the streaming
/// worker use the same instance concurrently.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Destination identifier.
    fn id(&self) -> &str;

    /// Destination type (e.g., "snowflake").
    fn storage_type(&self) -> &str;

    /// Loads a file of raw events through the stage.
    ///
    /// Tables in `already_uploaded` were loaded by an earlier attempt for the
    /// same file and are not loaded again. When `need_copy_event` is set the
    /// original event of every row is kept for outcome reporting.
    ///
    /// Per-table failures are reported inside the returned
    /// [`StoreOutcome`]; only a processor failure fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor rejects the input or the
    /// destination has no stage.
    async fn store(
        &self,
        file_name: &str,
        objects: &[RawEvent],
        already_uploaded: &HashSet<String>,
        need_copy_event: bool,
    ) -> Result<StoreOutcome, DestinationError>;

    /// Upserts a single event keyed by the configured unique-id field.
    ///
    /// # Errors
    ///
    /// Returns an error if processing, reconciliation or the write fails.
    async fn update(&self, object: &RawEvent) -> Result<(), DestinationError>;

    /// Removes every row of a table, if the table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried or truncated.
    async fn clean(&self, table: &str) -> Result<(), DestinationError>;

    /// Closes the streaming worker, the backend adapter and the stage.
    ///
    /// Safe to call more than once; only the first call does any work.
    ///
    /// # Errors
    ///
    /// Returns every close failure, in close order.
    async fn close(&self) -> Result<(), CloseError>;

    /// Returns metadata about this destination.
    fn metadata(&self) -> StorageMetadata {
        StorageMetadata::new(self.id(), self.storage_type(), "unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_error_retryable() {
        assert!(DestinationError::connection_msg("test").is_retryable());
        assert!(
            !DestinationError::serialization(std::io::Error::other("test"), "test").is_retryable()
        );
        assert!(DestinationError::write_msg("test", true).is_retryable());
        assert!(!DestinationError::write_msg("test", false).is_retryable());
        assert!(!DestinationError::configuration("test", None).is_retryable());
        assert!(!DestinationError::schema_missing("PUBLIC", "nope").is_retryable());
        assert!(DestinationError::schema_mismatch("events", "invalid identifier").is_retryable());
        assert!(DestinationError::stage_msg("f1", "slow down", true).is_retryable());
    }

    #[test]
    fn test_wrapped_errors_inherit_retryability() {
        let copy = DestinationError::copy(
            "f1.dat",
            "events",
            DestinationError::connection_msg("timeout"),
        );
        assert!(copy.is_retryable());

        let reconcile = DestinationError::reconcile(
            "events",
            DestinationError::configuration("bad type", None),
        );
        assert!(!reconcile.is_retryable());
    }

    #[test]
    fn test_copy_error_message_names_file() {
        let err = DestinationError::copy(
            "f1.dat",
            "events",
            DestinationError::write_msg("denied", false),
        );
        let message = err.to_string();
        assert!(message.contains("f1.dat"));
        assert!(message.contains("events"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_close_error_display_lists_every_failure() {
        let err = CloseError {
            destination_id: "sf1".to_string(),
            failures: vec![
                CloseFailure {
                    resource: "warehouse",
                    error: DestinationError::connection_msg("connection reset"),
                },
                CloseFailure {
                    resource: "stage",
                    error: DestinationError::stage_msg("-", "client closed", false),
                },
            ],
        };

        assert_eq!(err.len(), 2);
        let message = err.to_string();
        assert!(message.starts_with("[sf1] failed to close 2 resource(s)"));
        assert!(message.contains("error closing warehouse: Connection error: connection reset"));
        assert!(message.contains("error closing stage"));

        let as_error: &dyn std::error::Error = &err;
        assert!(as_error.source().is_none());
    }

    #[test]
    fn test_storage_metadata_builder() {
        let meta = StorageMetadata::new("sf1", "snowflake", "batch")
            .with_stage_type("s3")
            .with_property("schema", "PUBLIC");

        assert_eq!(meta.id, "sf1");
        assert_eq!(meta.storage_type, "snowflake");
        assert_eq!(meta.mode, "batch");
        assert_eq!(meta.stage_type.as_deref(), Some("s3"));
        assert_eq!(meta.properties.get("schema"), Some(&"PUBLIC".to_string()));
    }
}
