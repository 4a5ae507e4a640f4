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

//! Turning raw events into typed table batches.
//!
//! The [`Processor`] trait is the seam between upstream event handling and
//! the warehouse path. A processor flattens events into rows, infers the
//! schema of each target table, and partitions the input into batches,
//! [`FailedEvents`] and [`SkippedEvents`].
//!
//! [`FlatProcessor`] is the reference implementation:
//!
//! - nested objects are flattened with `_` (`{"a": {"b": 1}}` becomes
//!   column `a_b`),
//! - arrays are kept whole and typed as [`SemanticType::Object`],
//! - `null` values produce no column,
//! - the target table is either fixed or read from a top-level field.
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::processor::{FlatProcessor, Processor};
//! use serde_json::json;
//! use std::collections::HashSet;
//!
//! let processor = FlatProcessor::builder()
//!     .table_name_field("event_type")
//!     .build();
//!
//! let events = vec![
//!     json!({"event_type": "click", "user": {"id": 1}}).as_object().unwrap().clone(),
//!     json!({"event_type": "view", "page": "/"}).as_object().unwrap().clone(),
//! ];
//!
//! let result = processor
//!     .process_events("f1.log", &events, &HashSet::new(), false)
//!     .unwrap();
//!
//! assert_eq!(result.batches.len(), 2);
//! assert!(result.failed.is_empty());
//! ```

use crate::batch::{Envelope, ProcessedBatch, Row};
use crate::destination::DestinationError;
use crate::event::{FailedEvents, RawEvent, SkippedEvents};
use crate::schema::{normalize_identifier, SemanticType, TableSchema};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Error type for processors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The input as a whole cannot be processed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A single event cannot be turned into a row
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The event is deliberately dropped
    #[error("Event skipped: {0}")]
    Skipped(String),

    /// Other errors
    #[error("Processor error: {0}")]
    Other(String),
}

impl From<ProcessorError> for DestinationError {
    fn from(error: ProcessorError) -> Self {
        Self::processing(error)
    }
}

/// Output of [`Processor::process_events`].
#[derive(Debug, Default)]
pub struct ProcessingResult {
    /// One batch per destination table, in table name order
    pub batches: Vec<ProcessedBatch>,
    /// Events that could not be processed
    pub failed: FailedEvents,
    /// Events that were deliberately dropped
    pub skipped: SkippedEvents,
}

/// Converts raw events into table batches and single-row envelopes.
///
/// Processing is CPU-only, so the trait is synchronous.
pub trait Processor: Send + Sync {
    /// Processes a file of events for the batch path.
    ///
    /// Rows for tables listed in `already_uploaded` are dropped. When
    /// `need_copy_event` is set every batch keeps the original event of each
    /// row.
    ///
    /// # Errors
    ///
    /// Returns an error if the input as a whole is unusable. Per-event
    /// problems end up in [`ProcessingResult::failed`] instead.
    fn process_events(
        &self,
        file_name: &str,
        objects: &[RawEvent],
        already_uploaded: &HashSet<String>,
        need_copy_event: bool,
    ) -> Result<ProcessingResult, ProcessorError>;

    /// Processes one event for the streaming path.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Skipped`] with the reason if the event is
    /// deliberately dropped, or another error if it cannot be turned into a
    /// row.
    fn process_event(
        &self,
        object: &RawEvent,
        is_update: bool,
    ) -> Result<Vec<Envelope>, ProcessorError>;
}

/// Where one event goes.
enum Routing {
    Table(String),
    Skip(String),
    Fail(String),
}

/// Reference processor that flattens nested JSON.
#[derive(Debug, Clone)]
pub struct FlatProcessor {
    default_table: String,
    table_name_field: Option<String>,
    source_field: String,
}

impl Default for FlatProcessor {
    fn default() -> Self {
        FlatProcessorBuilder::default().build()
    }
}

impl FlatProcessor {
    /// Creates a new builder for `FlatProcessor`.
    #[must_use]
    pub fn builder() -> FlatProcessorBuilder {
        FlatProcessorBuilder::default()
    }

    fn route(&self, event: &RawEvent) -> Routing {
        let Some(field) = &self.table_name_field else {
            return Routing::Table(self.default_table.clone());
        };

        match event.get(field) {
            None | Some(Value::Null) => {
                Routing::Skip(format!("table name field '{field}' is missing"))
            }
            Some(Value::String(name)) if name.trim().is_empty() => {
                Routing::Skip(format!("table name field '{field}' is empty"))
            }
            Some(Value::String(name)) => Routing::Table(normalize_identifier(name.trim())),
            Some(Value::Number(n)) => Routing::Table(normalize_identifier(&n.to_string())),
            Some(other) => Routing::Fail(format!(
                "table name field '{field}' must be a string, got {other}"
            )),
        }
    }

    fn source_of(&self, event: &RawEvent) -> String {
        match event.get(&self.source_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => "unknown".to_string(),
        }
    }

    /// Flattens one event into a row and its schema.
    fn flatten(&self, table: &str, event: &RawEvent) -> Result<(TableSchema, Row), ProcessorError> {
        let mut schema = TableSchema::new(table);
        let mut row = Row::new();
        flatten_into("", event, &mut schema, &mut row);

        if row.is_empty() {
            return Err(ProcessorError::InvalidEvent(
                "event has no non-null fields".to_string(),
            ));
        }
        Ok((schema, row))
    }
}

fn flatten_into(prefix: &str, object: &RawEvent, schema: &mut TableSchema, row: &mut Row) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            normalize_identifier(key)
        } else {
            normalize_identifier(&format!("{prefix}_{key}"))
        };

        if let Value::Object(nested) = value {
            flatten_into(&name, nested, schema, row);
            continue;
        }

        let Some(ty) = SemanticType::infer(value) else {
            continue;
        };
        schema.add_column(name.clone(), ty);
        // Colliding names keep the first value.
        row.entry(name).or_insert_with(|| value.clone());
    }
}

#[derive(Default)]
struct BatchBuilder {
    schema: Option<TableSchema>,
    rows: Vec<Row>,
    events_per_source: HashMap<String, usize>,
    source_events: Vec<RawEvent>,
}

impl Processor for FlatProcessor {
    fn process_events(
        &self,
        file_name: &str,
        objects: &[RawEvent],
        already_uploaded: &HashSet<String>,
        need_copy_event: bool,
    ) -> Result<ProcessingResult, ProcessorError> {
        if file_name.is_empty() {
            return Err(ProcessorError::InvalidInput(
                "file name cannot be empty".to_string(),
            ));
        }

        let mut result = ProcessingResult::default();
        let mut builders: BTreeMap<String, BatchBuilder> = BTreeMap::new();

        for event in objects {
            let table = match self.route(event) {
                Routing::Table(table) => table,
                Routing::Skip(reason) => {
                    result.skipped.push(event.clone(), reason);
                    continue;
                }
                Routing::Fail(reason) => {
                    result.failed.push(event.clone(), reason);
                    continue;
                }
            };

            if already_uploaded.contains(&table) {
                continue;
            }

            let (schema, row) = match self.flatten(&table, event) {
                Ok(flattened) => flattened,
                Err(e) => {
                    result.failed.push(event.clone(), e.to_string());
                    continue;
                }
            };

            let builder = builders.entry(table).or_default();
            if let Some(existing) = &mut builder.schema {
                existing.merge(&schema);
            } else {
                builder.schema = Some(schema);
            }
            builder.rows.push(row);
            *builder
                .events_per_source
                .entry(self.source_of(event))
                .or_insert(0) += 1;
            if need_copy_event {
                builder.source_events.push(event.clone());
            }
        }

        for (table, builder) in builders {
            let Some(schema) = builder.schema else {
                continue;
            };
            result.batches.push(ProcessedBatch {
                file_name: format!("{file_name}_{table}_{}", uuid::Uuid::new_v4().simple()),
                schema,
                rows: builder.rows,
                events_per_source: builder.events_per_source,
                source_events: need_copy_event.then_some(builder.source_events),
            });
        }

        debug!(
            file_name = %file_name,
            batches = result.batches.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Processed events"
        );

        Ok(result)
    }

    fn process_event(
        &self,
        object: &RawEvent,
        _is_update: bool,
    ) -> Result<Vec<Envelope>, ProcessorError> {
        let table = match self.route(object) {
            Routing::Table(table) => table,
            Routing::Skip(reason) => return Err(ProcessorError::Skipped(reason)),
            Routing::Fail(reason) => return Err(ProcessorError::InvalidEvent(reason)),
        };

        let (schema, row) = self.flatten(&table, object)?;
        Ok(vec![Envelope { schema, row }])
    }
}

/// Builder for `FlatProcessor`.
#[derive(Debug, Default)]
pub struct FlatProcessorBuilder {
    default_table: Option<String>,
    table_name_field: Option<String>,
    source_field: Option<String>,
}

impl FlatProcessorBuilder {
    /// Sets the table used when no table name field is configured.
    ///
    /// Default: `events`
    #[must_use]
    pub fn default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = Some(table.into());
        self
    }

    /// Routes every event to the table named by this top-level field.
    #[must_use]
    pub fn table_name_field(mut self, field: impl Into<String>) -> Self {
        self.table_name_field = Some(field.into());
        self
    }

    /// Sets the field that names an event's source.
    ///
    /// Default: `src`
    #[must_use]
    pub fn source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }

    /// Builds the processor.
    #[must_use]
    pub fn build(self) -> FlatProcessor {
        FlatProcessor {
            default_table: normalize_identifier(
                self.default_table.as_deref().unwrap_or("events"),
            ),
            table_name_field: self.table_name_field,
            source_field: self.source_field.unwrap_or_else(|| "src".to_string()),
        }
    }
}
