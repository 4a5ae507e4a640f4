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

//! Raw events and the partitions the processor sorts them into.
//!
//! A [`RawEvent`] is the untyped JSON object handed to a destination. Before
//! anything reaches the warehouse the processor splits a file of raw events
//! into three groups:
//!
//! - rows that belong to a table batch,
//! - [`FailedEvents`]: events that could not be processed at all,
//! - [`SkippedEvents`]: events deliberately dropped (for example because
//!   their table name resolved to nothing).
//!
//! Failed events are candidates for a fallback store, skipped events are
//! only reported.
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::event::{FailedEvents, RawEvent};
//! use serde_json::json;
//!
//! let mut event = RawEvent::new();
//! event.insert("id".to_string(), json!(42));
//!
//! let mut failed = FailedEvents::default();
//! failed.push(event, "table name must be a string");
//!
//! assert_eq!(failed.len(), 1);
//! assert_eq!(failed.events[0].reason, "table name must be a string");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An untyped event as received from upstream.
pub type RawEvent = Map<String, Value>;

/// An event that could not be turned into a row, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// The original event
    pub event: RawEvent,
    /// Human-readable failure reason
    pub reason: String,
}

impl FailedEvent {
    /// Creates a failed event.
    #[must_use]
    pub fn new(event: RawEvent, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
        }
    }

    /// Serializes the original event as compact JSON.
    #[must_use]
    pub fn event_json(&self) -> String {
        Value::Object(self.event.clone()).to_string()
    }
}

/// Events that failed processing, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailedEvents {
    /// Failed events
    pub events: Vec<FailedEvent>,
}

impl FailedEvents {
    /// Appends a failed event.
    pub fn push(&mut self, event: RawEvent, reason: impl Into<String>) {
        self.events.push(FailedEvent::new(event, reason));
    }

    /// Number of failed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// An event that was intentionally not loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEvent {
    /// The original event
    pub event: RawEvent,
    /// Why the event was skipped
    pub reason: String,
}

impl SkippedEvent {
    /// Creates a skipped event.
    #[must_use]
    pub fn new(event: RawEvent, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
        }
    }
}

/// Events that were skipped, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkippedEvents {
    /// Skipped events
    pub events: Vec<SkippedEvent>,
}

impl SkippedEvents {
    /// Appends a skipped event.
    pub fn push(&mut self, event: RawEvent, reason: impl Into<String>) {
        self.events.push(SkippedEvent::new(event, reason));
    }

    /// Number of skipped events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing was skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: i64) -> RawEvent {
        let mut e = RawEvent::new();
        e.insert("id".to_string(), json!(id));
        e
    }

    #[test]
    fn test_failed_events_preserve_order() {
        let mut failed = FailedEvents::default();
        assert!(failed.is_empty());

        failed.push(event(1), "first");
        failed.push(event(2), "second");

        assert_eq!(failed.len(), 2);
        assert_eq!(failed.events[0].reason, "first");
        assert_eq!(failed.events[1].event["id"], json!(2));
    }

    #[test]
    fn test_failed_event_json() {
        let failed = FailedEvent::new(event(7), "boom");
        assert_eq!(failed.event_json(), r#"{"id":7}"#);
    }

    #[test]
    fn test_skipped_events() {
        let mut skipped = SkippedEvents::default();
        skipped.push(event(3), "empty table name");

        assert_eq!(skipped.len(), 1);
        assert!(!skipped.is_empty());
        assert_eq!(skipped.events[0].reason, "empty table name");
    }
}
