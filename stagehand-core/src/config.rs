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

//! Destination-independent storage configuration.
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::config::{DestinationMode, StorageConfig};
//! use std::time::Duration;
//!
//! let config = StorageConfig::builder()
//!     .destination_id("snowflake-prod")
//!     .mode(DestinationMode::Stream)
//!     .unique_id_field("eventn_ctx/event_id")
//!     .primary_key_fields(["eventn_ctx_event_id"])
//!     .max_columns(500)
//!     .lock_ttl(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.unique_id_field.unwrap().flat_name(), "eventn_ctx_event_id");
//! ```

use crate::event::RawEvent;
use crate::schema::normalize_identifier;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// How events reach the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationMode {
    /// Files accumulated in object storage, loaded in bulk
    #[default]
    Batch,
    /// Events upserted one row at a time from a queue
    Stream,
}

impl DestinationMode {
    /// Returns the mode as a static string for logs and metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Stream => "stream",
        }
    }

    /// Returns `true` for stream mode.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream)
    }
}

impl fmt::Display for DestinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path to the field that identifies an event, e.g. `eventn_ctx/event_id`.
///
/// The value is looked up by walking nested objects; rows carry it under the
/// flattened column name (`eventn_ctx_event_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIdField {
    path: Vec<String>,
    flat_name: String,
}

impl UniqueIdField {
    /// Parses a `/`-separated path. Empty segments are ignored.
    ///
    /// Returns `None` if the path has no segments.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(ToString::to_string)
            .collect();

        if segments.is_empty() {
            return None;
        }

        let flat_name = normalize_identifier(&segments.join("_"));
        Some(Self {
            path: segments,
            flat_name,
        })
    }

    /// Column name the field has after flattening.
    #[must_use]
    pub fn flat_name(&self) -> &str {
        &self.flat_name
    }

    /// Path segments.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Extracts the identifier from a raw event.
    ///
    /// Falls back to the flattened key for events that were already flat.
    /// `null` counts as absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stagehand_core::config::UniqueIdField;
    /// use serde_json::json;
    ///
    /// let field = UniqueIdField::parse("ctx/id").unwrap();
    /// let event = json!({"ctx": {"id": "abc"}});
    /// assert_eq!(field.extract(event.as_object().unwrap()), Some(json!("abc")));
    /// ```
    #[must_use]
    pub fn extract(&self, event: &RawEvent) -> Option<Value> {
        let (first, rest) = self.path.split_first()?;
        let mut current = event.get(first);
        for segment in rest {
            current = current.and_then(|value| value.get(segment));
        }

        current
            .or_else(|| event.get(&self.flat_name))
            .filter(|value| !value.is_null())
            .cloned()
    }
}

impl fmt::Display for UniqueIdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("/"))
    }
}

/// Settings shared by every warehouse destination.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Destination identifier, used in logs, cache keys and lock keys
    pub destination_id: String,

    /// Delivery mode
    pub mode: DestinationMode,

    /// Field that identifies an event for upserts
    pub unique_id_field: Option<UniqueIdField>,

    /// Skip per-row success records in the outcome cache
    pub caching_disabled: bool,

    /// Columns that make up the primary key of created tables
    pub primary_key_fields: BTreeSet<String>,

    /// Upper bound on columns per table (None = unlimited)
    pub max_columns: Option<usize>,

    /// TTL of the schema lock held while issuing DDL
    pub lock_ttl: Duration,

    /// How long to wait for the schema lock before giving up
    pub lock_wait: Duration,
}

impl StorageConfig {
    /// Creates a new builder for `StorageConfig`.
    #[must_use]
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder::default()
    }
}

/// Builder for `StorageConfig`.
#[derive(Debug, Default)]
pub struct StorageConfigBuilder {
    destination_id: Option<String>,
    mode: DestinationMode,
    unique_id_field: Option<String>,
    caching_disabled: bool,
    primary_key_fields: BTreeSet<String>,
    max_columns: Option<usize>,
    lock_ttl: Duration,
    lock_wait: Duration,
}

impl StorageConfigBuilder {
    /// Sets the destination identifier.
    #[must_use]
    pub fn destination_id(mut self, id: impl Into<String>) -> Self {
        self.destination_id = Some(id.into());
        self
    }

    /// Sets the delivery mode.
    #[must_use]
    pub fn mode(mut self, mode: DestinationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the unique-id field path (e.g., `eventn_ctx/event_id`).
    #[must_use]
    pub fn unique_id_field(mut self, path: impl Into<String>) -> Self {
        self.unique_id_field = Some(path.into());
        self
    }

    /// Disables per-row success records in the outcome cache.
    #[must_use]
    pub fn caching_disabled(mut self, disabled: bool) -> Self {
        self.caching_disabled = disabled;
        self
    }

    /// Sets the primary key columns of created tables.
    #[must_use]
    pub fn primary_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the maximum number of columns per table.
    #[must_use]
    pub fn max_columns(mut self, max: usize) -> Self {
        self.max_columns = Some(max);
        self
    }

    /// Sets the schema lock TTL.
    #[must_use]
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets how long to wait for the schema lock.
    #[must_use]
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Builds the `StorageConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination id is missing or empty, the
    /// unique-id path has no segments, or `max_columns` is zero.
    pub fn build(self) -> Result<StorageConfig, String> {
        let destination_id = self.destination_id.ok_or("destination_id is required")?;
        if destination_id.is_empty() {
            return Err("destination_id cannot be empty".to_string());
        }

        let unique_id_field = match self.unique_id_field {
            Some(path) => Some(
                UniqueIdField::parse(&path)
                    .ok_or_else(|| format!("unique_id_field '{path}' has no path segments"))?,
            ),
            None => None,
        };

        if self.max_columns == Some(0) {
            return Err("max_columns must be greater than 0".to_string());
        }

        Ok(StorageConfig {
            destination_id,
            mode: self.mode,
            unique_id_field,
            caching_disabled: self.caching_disabled,
            primary_key_fields: self
                .primary_key_fields
                .iter()
                .map(|field| normalize_identifier(field))
                .collect(),
            max_columns: self.max_columns,
            lock_ttl: if self.lock_ttl.is_zero() {
                Duration::from_secs(30)
            } else {
                self.lock_ttl
            },
            lock_wait: if self.lock_wait.is_zero() {
                Duration::from_secs(60)
            } else {
                self.lock_wait
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let config = StorageConfig::builder()
            .destination_id("dest")
            .build()
            .unwrap();

        assert_eq!(config.destination_id, "dest");
        assert_eq!(config.mode, DestinationMode::Batch);
        assert!(config.unique_id_field.is_none());
        assert!(!config.caching_disabled);
        assert!(config.primary_key_fields.is_empty());
        assert_eq!(config.max_columns, None);
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.lock_wait, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_requires_destination_id() {
        let err = StorageConfig::builder().build().unwrap_err();
        assert!(err.contains("destination_id"));

        let err = StorageConfig::builder().destination_id("").build().unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(StorageConfig::builder()
            .destination_id("d")
            .unique_id_field("//")
            .build()
            .is_err());
        assert!(StorageConfig::builder()
            .destination_id("d")
            .max_columns(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_primary_keys_are_normalized() {
        let config = StorageConfig::builder()
            .destination_id("d")
            .primary_key_fields(["EventId", "user-id"])
            .build()
            .unwrap();

        assert!(config.primary_key_fields.contains("eventid"));
        assert!(config.primary_key_fields.contains("user_id"));
    }

    #[test]
    fn test_unique_id_extract_nested_and_flat() {
        let field = UniqueIdField::parse("eventn_ctx/event_id").unwrap();
        assert_eq!(field.flat_name(), "eventn_ctx_event_id");
        assert_eq!(field.to_string(), "eventn_ctx/event_id");

        let nested = json!({"eventn_ctx": {"event_id": "e-1"}});
        assert_eq!(field.extract(nested.as_object().unwrap()), Some(json!("e-1")));

        let flat = json!({"eventn_ctx_event_id": 7});
        assert_eq!(field.extract(flat.as_object().unwrap()), Some(json!(7)));

        let missing = json!({"eventn_ctx": {"other": 1}});
        assert_eq!(field.extract(missing.as_object().unwrap()), None);

        let null = json!({"eventn_ctx": {"event_id": null}});
        assert_eq!(field.extract(null.as_object().unwrap()), None);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DestinationMode::Batch.to_string(), "batch");
        assert!(DestinationMode::Stream.is_stream());
    }
}
