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

//! Inferred schemas and destination table definitions.
//!
//! Two shapes describe a table:
//!
//! - [`TableSchema`]: what the processor inferred from a batch, using
//!   backend-neutral [`SemanticType`]s.
//! - [`Table`]: what the warehouse should hold, with native SQL types and
//!   primary keys. The reconciler turns the former into the latter.
//!
//! Identifiers are normalized with [`normalize_identifier`] so that the same
//! source field always lands in the same column regardless of casing or
//! punctuation.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Backend-neutral column type inferred from event values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    /// Free text
    String,
    /// Whole number
    Integer,
    /// Floating point number
    Number,
    /// Point in time
    Timestamp,
    /// true / false
    Boolean,
    /// Nested object or array, stored as serialized JSON
    Object,
}

impl SemanticType {
    /// Infers the type of a JSON value. `null` carries no type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stagehand_core::schema::SemanticType;
    /// use serde_json::json;
    ///
    /// assert_eq!(SemanticType::infer(&json!(1)), Some(SemanticType::Integer));
    /// assert_eq!(SemanticType::infer(&json!(1.5)), Some(SemanticType::Number));
    /// assert_eq!(
    ///     SemanticType::infer(&json!("2024-01-01T10:00:00Z")),
    ///     Some(SemanticType::Timestamp)
    /// );
    /// assert_eq!(SemanticType::infer(&json!(null)), None);
    /// ```
    #[must_use]
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Number),
            Value::String(s) if looks_like_timestamp(s) => Some(Self::Timestamp),
            Value::String(_) => Some(Self::String),
            Value::Array(_) | Value::Object(_) => Some(Self::Object),
        }
    }

    /// Returns the narrowest type both values fit in.
    ///
    /// Integers widen to numbers; every other mix falls back to text.
    #[must_use]
    pub const fn widen(self, other: Self) -> Self {
        match (self, other) {
            (Self::String, Self::String) => Self::String,
            (Self::Integer, Self::Integer) => Self::Integer,
            (Self::Number, Self::Number)
            | (Self::Integer, Self::Number)
            | (Self::Number, Self::Integer) => Self::Number,
            (Self::Timestamp, Self::Timestamp) => Self::Timestamp,
            (Self::Boolean, Self::Boolean) => Self::Boolean,
            (Self::Object, Self::Object) => Self::Object,
            _ => Self::String,
        }
    }

    /// Lowercase name used in logs and serialized records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn looks_like_timestamp(s: &str) -> bool {
    // Cheap reject before trying the parsers.
    if s.len() < 10 || !s.as_bytes()[0].is_ascii_digit() {
        return false;
    }
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Normalizes a table or column name.
///
/// Lowercases, replaces every character outside `[a-z0-9_]` with `_`, and
/// prefixes a leading digit with `_`. The function is idempotent.
///
/// # Examples
///
/// ```rust
/// use stagehand_core::schema::normalize_identifier;
///
/// assert_eq!(normalize_identifier("User-Agent"), "user_agent");
/// assert_eq!(normalize_identifier("1st place"), "_1st_place");
/// assert_eq!(normalize_identifier("already_ok"), "already_ok");
/// ```
#[must_use]
pub fn normalize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        out.push('_');
    } else if out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Re-keys a row by normalized column names.
///
/// When two keys collapse onto the same column the first non-null value in
/// key order wins, matching how [`TableSchema::from_columns`] merges types.
#[must_use]
pub fn normalize_row(row: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in row {
        let column = normalize_identifier(key);
        match out.get(&column) {
            Some(Value::Null) | None => {
                out.insert(column, value.clone());
            }
            Some(_) => {}
        }
    }
    out
}

/// Schema inferred for one destination table.
///
/// Column order is the lexical order of the `BTreeMap`, which keeps the
/// serialized header stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Target table name
    pub name: String,
    /// Column name to inferred type
    pub columns: BTreeMap<String, SemanticType>,
}

impl TableSchema {
    /// Creates an empty schema for a table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Builds a schema from `(column, type)` pairs, widening duplicates.
    #[must_use]
    pub fn from_columns<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = (S, SemanticType)>,
        S: Into<String>,
    {
        let mut schema = Self::new(name);
        for (column, ty) in columns {
            schema.add_column(column, ty);
        }
        schema
    }

    /// Adds a column, widening the type if the column already exists.
    pub fn add_column(&mut self, column: impl Into<String>, ty: SemanticType) {
        self.columns
            .entry(column.into())
            .and_modify(|existing| *existing = existing.widen(ty))
            .or_insert(ty);
    }

    /// Folds another schema for the same table into this one.
    pub fn merge(&mut self, other: &Self) {
        for (column, ty) in &other.columns {
            self.add_column(column.clone(), *ty);
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A destination table definition with native column types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    /// Normalized table name
    pub name: String,
    /// Column name to native SQL type
    pub columns: BTreeMap<String, String>,
    /// Primary key column names
    pub primary_keys: BTreeSet<String>,
}

impl Table {
    /// Creates an empty table definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            primary_keys: BTreeSet::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.insert(name.into(), sql_type.into());
        self
    }

    /// Marks a column as part of the primary key.
    #[must_use]
    pub fn with_primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_keys.insert(name.into());
        self
    }

    /// Column names in table order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Returns `true` if every column of `desired` exists here.
    #[must_use]
    pub fn contains_all(&self, desired: &Self) -> bool {
        desired
            .columns
            .keys()
            .all(|column| self.columns.contains_key(column))
    }

    /// Columns of `desired` this table lacks.
    #[must_use]
    pub fn missing_columns(&self, desired: &Self) -> BTreeMap<String, String> {
        desired
            .columns
            .iter()
            .filter(|(column, _)| !self.columns.contains_key(*column))
            .map(|(column, ty)| (column.clone(), ty.clone()))
            .collect()
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the table has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_types() {
        assert_eq!(SemanticType::infer(&json!(true)), Some(SemanticType::Boolean));
        assert_eq!(SemanticType::infer(&json!(-3)), Some(SemanticType::Integer));
        assert_eq!(SemanticType::infer(&json!(2.5)), Some(SemanticType::Number));
        assert_eq!(SemanticType::infer(&json!("hello")), Some(SemanticType::String));
        assert_eq!(
            SemanticType::infer(&json!("2024-01-01")),
            Some(SemanticType::Timestamp)
        );
        assert_eq!(
            SemanticType::infer(&json!("2024-01-01 12:30:00")),
            Some(SemanticType::Timestamp)
        );
        assert_eq!(SemanticType::infer(&json!([1, 2])), Some(SemanticType::Object));
        assert_eq!(SemanticType::infer(&json!({"a": 1})), Some(SemanticType::Object));
        assert_eq!(SemanticType::infer(&json!("12345")), Some(SemanticType::String));
    }

    #[test]
    fn test_widen() {
        use SemanticType::*;
        assert_eq!(Integer.widen(Integer), Integer);
        assert_eq!(Integer.widen(Number), Number);
        assert_eq!(Number.widen(Integer), Number);
        assert_eq!(Boolean.widen(Integer), String);
        assert_eq!(Timestamp.widen(String), String);
        assert_eq!(Object.widen(Object), Object);
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("EventType"), "eventtype");
        assert_eq!(normalize_identifier("page.url"), "page_url");
        assert_eq!(normalize_identifier("9lives"), "_9lives");
        assert_eq!(normalize_identifier(""), "_");
        assert_eq!(normalize_identifier("é"), "_");

        let once = normalize_identifier("Mixed Case-Name");
        assert_eq!(normalize_identifier(&once), once);
    }

    #[test]
    fn test_normalize_row_collisions_are_deterministic() {
        let mut row = BTreeMap::new();
        row.insert("A".to_string(), json!(null));
        row.insert("a".to_string(), json!(2));
        row.insert("b-c".to_string(), json!("x"));

        let normalized = normalize_row(&row);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized["a"], json!(2));
        assert_eq!(normalized["b_c"], json!("x"));
    }

    #[test]
    fn test_table_schema_widens_on_add() {
        let schema = TableSchema::from_columns(
            "events",
            [
                ("a", SemanticType::Integer),
                ("a", SemanticType::Number),
                ("b", SemanticType::Boolean),
            ],
        );

        assert_eq!(schema.len(), 2);
        assert_eq!(schema.columns["a"], SemanticType::Number);
    }

    #[test]
    fn test_table_missing_columns() {
        let existing = Table::new("events").with_column("a", "text");
        let desired = Table::new("events")
            .with_column("a", "text")
            .with_column("b", "bigint");

        assert!(!existing.contains_all(&desired));
        assert!(desired.contains_all(&existing));

        let missing = existing.missing_columns(&desired);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["b"], "bigint");
    }
}
