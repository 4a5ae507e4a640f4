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

//! Processed batches and per-table write outcomes.

use crate::destination::DestinationError;
use crate::event::{FailedEvents, RawEvent, SkippedEvents};
use crate::schema::TableSchema;
use crate::wire;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// One flattened row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Rows for one destination table, ready to be staged.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedBatch {
    /// Inferred schema of the rows
    pub schema: TableSchema,

    /// Rows in input order
    pub rows: Vec<Row>,

    /// Row count per event source
    pub events_per_source: HashMap<String, usize>,

    /// Unique name the batch is staged under
    pub file_name: String,

    /// Original event of every row, kept only when requested
    pub source_events: Option<Vec<RawEvent>>,
}

impl ProcessedBatch {
    /// Number of rows in the batch.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Serializes the rows in the staging format with `header` first.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn payload_with_header(&self, header: &[String]) -> Result<Vec<u8>, DestinationError> {
        wire::encode_with_header(header, &self.rows)
    }

    /// The event to report for row `index`: the original event if it was
    /// kept, the flattened row otherwise.
    #[must_use]
    pub fn reportable_event(&self, index: usize) -> RawEvent {
        if let Some(event) = self
            .source_events
            .as_ref()
            .and_then(|events| events.get(index))
        {
            return event.clone();
        }
        self.rows
            .get(index)
            .map(|row| row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// A single row produced by the streaming path.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Inferred schema of the row
    pub schema: TableSchema,
    /// The row
    pub row: Row,
}

/// Result of loading one table.
#[derive(Debug)]
pub struct WriteOutcome {
    /// Rows in the batch
    pub rows_count: usize,
    /// Row count per event source
    pub events_per_source: HashMap<String, usize>,
    /// Why the table failed, if it did
    pub error: Option<DestinationError>,
}

impl WriteOutcome {
    /// Returns `true` if the table loaded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything [`Storage::store`](crate::destination::Storage::store) reports.
#[derive(Debug, Default)]
pub struct StoreOutcome {
    /// Outcome per destination table
    pub results: HashMap<String, WriteOutcome>,

    /// Events the processor could not handle.
    ///
    /// `None` when any table failed: the caller will retry the whole file,
    /// and handing these events to a fallback now would report them twice.
    pub failed: Option<FailedEvents>,

    /// Events the processor skipped. Always present.
    pub skipped: SkippedEvents,
}

impl StoreOutcome {
    /// Returns `true` if every table loaded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(WriteOutcome::is_success)
    }

    /// Names of tables that failed.
    #[must_use]
    pub fn failed_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self
            .results
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(table, _)| table.as_str())
            .collect();
        tables.sort_unstable();
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(with_sources: bool) -> ProcessedBatch {
        let mut row = Row::new();
        row.insert("a".to_string(), json!(1));

        let mut source = RawEvent::new();
        source.insert("nested".to_string(), json!({"a": 1}));

        ProcessedBatch {
            schema: TableSchema::new("events"),
            rows: vec![row],
            events_per_source: HashMap::from([("api".to_string(), 1)]),
            file_name: "f1.dat_events".to_string(),
            source_events: with_sources.then(|| vec![source]),
        }
    }

    #[test]
    fn test_reportable_event_prefers_source() {
        let with = batch(true);
        assert_eq!(with.reportable_event(0)["nested"], json!({"a": 1}));

        let without = batch(false);
        assert_eq!(without.reportable_event(0)["a"], json!(1));
        assert!(without.reportable_event(5).is_empty());
    }

    #[test]
    fn test_payload_with_header() {
        let payload = batch(false)
            .payload_with_header(&["a".to_string()])
            .unwrap();
        assert_eq!(payload, b"a\n1\n");
    }

    #[test]
    fn test_store_outcome_failed_tables() {
        let mut outcome = StoreOutcome::default();
        outcome.results.insert(
            "ok".to_string(),
            WriteOutcome {
                rows_count: 1,
                events_per_source: HashMap::new(),
                error: None,
            },
        );
        outcome.results.insert(
            "bad".to_string(),
            WriteOutcome {
                rows_count: 2,
                events_per_source: HashMap::new(),
                error: Some(DestinationError::write_msg("x", false)),
            },
        );

        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.failed_tables(), vec!["bad"]);
    }
}
