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

//! Per-destination record of what happened to recent events.
//!
//! Operators look at the outcome cache to see the last events a destination
//! loaded, rejected or skipped. Records are bounded per destination; the
//! oldest are evicted first.

use crate::coordination::CoordinatorError;
use crate::event::RawEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of records kept per destination.
pub const DEFAULT_CAPACITY: usize = 100;

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Loaded into a table
    Succeeded,
    /// Could not be loaded
    Failed,
    /// Deliberately dropped
    Skipped,
}

/// One cached outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// What happened
    pub status: OutcomeStatus,
    /// The event, as reported
    pub event: RawEvent,
    /// Destination table for successes
    pub table: Option<String>,
    /// Failure or skip reason
    pub reason: Option<String>,
    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// A successful load into `table`.
    #[must_use]
    pub fn succeeded(event: RawEvent, table: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            event,
            table: Some(table.into()),
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    /// A failed load.
    #[must_use]
    pub fn failed(event: RawEvent, reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            event,
            table: None,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }

    /// A skipped event.
    #[must_use]
    pub fn skipped(event: RawEvent, reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            event,
            table: None,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Sink for event outcomes.
///
/// Failures to record are never fatal to a load; callers log them.
#[async_trait]
pub trait OutcomeCache: Send + Sync {
    /// Stores one record for a destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn record(&self, destination_id: &str, record: OutcomeRecord)
        -> Result<(), CoordinatorError>;

    /// Returns up to `limit` records for a destination, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn recent(
        &self,
        destination_id: &str,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, CoordinatorError>;

    /// Records a successful load.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn record_success(
        &self,
        destination_id: &str,
        event: RawEvent,
        table: &str,
    ) -> Result<(), CoordinatorError> {
        self.record(destination_id, OutcomeRecord::succeeded(event, table))
            .await
    }

    /// Records a failed load.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn record_error(
        &self,
        destination_id: &str,
        event: RawEvent,
        reason: &str,
    ) -> Result<(), CoordinatorError> {
        self.record(destination_id, OutcomeRecord::failed(event, reason))
            .await
    }

    /// Records a skipped event.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn record_skip(
        &self,
        destination_id: &str,
        event: RawEvent,
        reason: &str,
    ) -> Result<(), CoordinatorError> {
        self.record(destination_id, OutcomeRecord::skipped(event, reason))
            .await
    }
}

/// In-memory outcome cache with a fixed capacity per destination.
#[derive(Debug, Clone)]
pub struct MemoryOutcomeCache {
    capacity: usize,
    records: Arc<RwLock<HashMap<String, VecDeque<OutcomeRecord>>>>,
}

impl Default for MemoryOutcomeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryOutcomeCache {
    /// Creates a cache keeping `capacity` records per destination.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of records held for a destination.
    pub async fn len(&self, destination_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(destination_id)
            .map_or(0, VecDeque::len)
    }

    /// Counts held records with the given status.
    pub async fn count(&self, destination_id: &str, status: OutcomeStatus) -> usize {
        self.records
            .read()
            .await
            .get(destination_id)
            .map_or(0, |records| {
                records.iter().filter(|r| r.status == status).count()
            })
    }

    /// Drops every record.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl OutcomeCache for MemoryOutcomeCache {
    async fn record(
        &self,
        destination_id: &str,
        record: OutcomeRecord,
    ) -> Result<(), CoordinatorError> {
        let mut records = self.records.write().await;
        let queue = records.entry(destination_id.to_string()).or_default();
        queue.push_front(record);
        queue.truncate(self.capacity);
        Ok(())
    }

    async fn recent(
        &self,
        destination_id: &str,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, CoordinatorError> {
        Ok(self
            .records
            .read()
            .await
            .get(destination_id)
            .map(|records| records.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: i64) -> RawEvent {
        json!({"id": id}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_records_newest_first() {
        let cache = MemoryOutcomeCache::default();
        cache.record_success("d", event(1), "t").await.unwrap();
        cache.record_error("d", event(2), "boom").await.unwrap();
        cache.record_skip("d", event(3), "empty").await.unwrap();

        let recent = cache.recent("d", 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].status, OutcomeStatus::Skipped);
        assert_eq!(recent[1].reason.as_deref(), Some("boom"));
        assert_eq!(recent[2].table.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryOutcomeCache::new(2);
        for id in 0..5 {
            cache.record_success("d", event(id), "t").await.unwrap();
        }

        let recent = cache.recent("d", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event["id"], json!(4));
        assert_eq!(recent[1].event["id"], json!(3));
    }

    #[tokio::test]
    async fn test_destinations_are_isolated() {
        let cache = MemoryOutcomeCache::default();
        cache.record_error("a", event(1), "x").await.unwrap();

        assert_eq!(cache.len("a").await, 1);
        assert_eq!(cache.len("b").await, 0);
        assert!(cache.recent("b", 10).await.unwrap().is_empty());
        assert_eq!(cache.count("a", OutcomeStatus::Failed).await, 1);
    }

    #[test]
    fn test_record_serializes() {
        let record = OutcomeRecord::failed(event(1), "bad");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], json!("failed"));

        let back: OutcomeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
