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

//! Backend adapter traits and schema bootstrap.
//!
//! A [`Warehouse`] is a live session against a column-typed backend. It is
//! obtained from a [`Connector`], optionally scoped to a schema. The first
//! connection of a destination goes through [`connect_with_schema`], which
//! creates the schema if it does not exist yet.
//!
//! [`MockWarehouse`] and [`MockConnector`] keep everything in memory and
//! are meant for tests and examples.

use crate::batch::Row;
use crate::destination::DestinationError;
use crate::schema::{SemanticType, Table};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// A session against a warehouse backend.
///
/// Shared between the batch path and the streaming worker, so
/// implementations must be safe to call concurrently.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Backend type identifier (e.g., "snowflake").
    fn warehouse_type(&self) -> &'static str;

    /// Native column type for a semantic type.
    fn sql_type(&self, ty: SemanticType) -> &'static str;

    /// Creates a schema. Succeeds if it already exists.
    async fn create_schema(&self, schema: &str) -> Result<(), DestinationError>;

    /// Reads a table definition. Returns `None` if the table does not exist.
    async fn get_table(&self, table: &str) -> Result<Option<Table>, DestinationError>;

    /// Creates a table with its columns and primary key.
    async fn create_table(&self, table: &Table) -> Result<(), DestinationError>;

    /// Adds columns (name to native type) to an existing table.
    async fn add_columns(
        &self,
        table: &str,
        columns: &BTreeMap<String, String>,
    ) -> Result<(), DestinationError>;

    /// Bulk-loads a staged object into a table.
    ///
    /// `header` lists the columns in the order they appear in the file.
    async fn copy(
        &self,
        staged_object: &str,
        table: &str,
        header: &[String],
    ) -> Result<(), DestinationError>;

    /// Inserts the row, or updates the existing row with the same
    /// `id_column` value.
    ///
    /// Returns [`DestinationError::SchemaMismatch`] if the row names a
    /// column the table lacks.
    async fn upsert(&self, table: &Table, row: &Row, id_column: &str)
        -> Result<(), DestinationError>;

    /// Removes every row of a table.
    async fn truncate(&self, table: &str) -> Result<(), DestinationError>;

    /// Ends the session.
    async fn close(&self) -> Result<(), DestinationError>;
}

/// Opens warehouse sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced by this connector.
    type Connection: Warehouse;

    /// Connects, scoped to `schema` if one is given.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::SchemaMissing`] if the schema does not
    /// exist, or a connection error.
    async fn connect(&self, schema: Option<&str>) -> Result<Self::Connection, DestinationError>;
}

/// Connects to `schema`, creating it first if it does not exist.
///
/// An existing schema costs one connect. A missing schema costs a
/// schema-less connect, one `create_schema`, closing that session and a
/// second connect with the schema. A failure to close the schema-less
/// session is logged and otherwise ignored.
///
/// # Errors
///
/// Returns any connect error other than a missing schema, or the error of
/// `create_schema`.
pub async fn connect_with_schema<C: Connector>(
    connector: &C,
    schema: &str,
) -> Result<C::Connection, DestinationError> {
    match connector.connect(Some(schema)).await {
        Ok(connection) => Ok(connection),
        Err(DestinationError::SchemaMissing { .. }) => {
            info!(schema = %schema, "Schema does not exist, creating it");

            let bare = connector.connect(None).await?;
            let created = bare.create_schema(schema).await;
            if let Err(e) = bare.close().await {
                warn!(schema = %schema, error = %e, "Failed to close schema-less connection");
            }
            created?;

            connector.connect(Some(schema)).await
        }
        Err(e) => Err(e),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a [`MockWarehouse`] has seen.
#[derive(Debug, Default)]
struct MockState {
    schemas: HashSet<String>,
    tables: HashMap<String, Table>,
    rows: HashMap<String, Vec<Row>>,
    copies: Vec<CopyCall>,
    truncated: Vec<String>,

    connect_calls: usize,
    create_schema_calls: usize,
    get_table_calls: usize,
    create_table_calls: usize,
    add_columns_calls: usize,
    upsert_calls: usize,
    close_calls: usize,

    fail_copy_tables: HashSet<String>,
    fail_upserts: bool,
    fail_close: bool,
    get_table_delay: Duration,
}

/// A recorded [`Warehouse::copy`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCall {
    /// Staged object name
    pub staged_object: String,
    /// Target table
    pub table: String,
    /// Column order of the file
    pub header: Vec<String>,
}

/// In-memory warehouse for tests and examples.
///
/// Clones share state, so a test can keep a handle and inspect what the
/// storage did.
///
/// # Example
///
/// ```rust
/// use stagehand_core::warehouse::{MockWarehouse, Warehouse};
/// use stagehand_core::schema::Table;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let warehouse = MockWarehouse::new();
/// warehouse
///     .create_table(&Table::new("events").with_column("id", "bigint"))
///     .await?;
///
/// assert!(warehouse.table("events").is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockWarehouse {
    schema: Option<String>,
    state: Arc<Mutex<MockState>>,
    // Per session; clones of one session share it
    closed: Arc<AtomicBool>,
}

impl MockWarehouse {
    /// Creates an empty warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `copy` fail for the given table.
    #[must_use]
    pub fn with_copy_failure(self, table: impl Into<String>) -> Self {
        lock(&self.state).fail_copy_tables.insert(table.into());
        self
    }

    /// Makes every upsert fail with a retryable write error.
    #[must_use]
    pub fn with_upsert_failures(self) -> Self {
        lock(&self.state).fail_upserts = true;
        self
    }

    /// Makes every `get_table` take at least `delay`.
    #[must_use]
    pub fn with_get_table_delay(self, delay: Duration) -> Self {
        lock(&self.state).get_table_delay = delay;
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub fn with_close_failure(self) -> Self {
        lock(&self.state).fail_close = true;
        self
    }

    /// Pre-creates a table.
    #[must_use]
    pub fn with_table(self, table: Table) -> Self {
        lock(&self.state).tables.insert(table.name.clone(), table);
        self
    }

    /// Drops a column behind the storage's back.
    pub fn drop_column(&self, table: &str, column: &str) {
        if let Some(t) = lock(&self.state).tables.get_mut(table) {
            t.columns.remove(column);
        }
    }

    /// Schema this session is scoped to.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Current definition of a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Table> {
        lock(&self.state).tables.get(name).cloned()
    }

    /// Rows written to a table by upserts, in write order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.state).rows.get(table).cloned().unwrap_or_default()
    }

    /// Every copy issued, in order.
    #[must_use]
    pub fn copies(&self) -> Vec<CopyCall> {
        lock(&self.state).copies.clone()
    }

    /// Tables truncated, in order.
    #[must_use]
    pub fn truncated(&self) -> Vec<String> {
        lock(&self.state).truncated.clone()
    }

    /// Number of `get_table` calls.
    #[must_use]
    pub fn get_table_calls(&self) -> usize {
        lock(&self.state).get_table_calls
    }

    /// Number of `create_table` calls.
    #[must_use]
    pub fn create_table_calls(&self) -> usize {
        lock(&self.state).create_table_calls
    }

    /// Number of `add_columns` calls.
    #[must_use]
    pub fn add_columns_calls(&self) -> usize {
        lock(&self.state).add_columns_calls
    }

    /// Number of `create_schema` calls.
    #[must_use]
    pub fn create_schema_calls(&self) -> usize {
        lock(&self.state).create_schema_calls
    }

    /// Number of `upsert` calls.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        lock(&self.state).upsert_calls
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    fn warehouse_type(&self) -> &'static str {
        "mock"
    }

    fn sql_type(&self, ty: SemanticType) -> &'static str {
        match ty {
            SemanticType::String => "text",
            SemanticType::Integer => "bigint",
            SemanticType::Number => "double",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Boolean => "boolean",
            SemanticType::Object => "json",
        }
    }

    async fn create_schema(&self, schema: &str) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.create_schema_calls += 1;
        state.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn get_table(&self, table: &str) -> Result<Option<Table>, DestinationError> {
        let delay = {
            let mut state = lock(&self.state);
            state.get_table_calls += 1;
            state.get_table_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(lock(&self.state).tables.get(table).cloned())
    }

    async fn create_table(&self, table: &Table) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.create_table_calls += 1;
        if state.tables.contains_key(&table.name) {
            return Err(DestinationError::reconcile_msg(
                &table.name,
                "table already exists",
            ));
        }
        state.tables.insert(table.name.clone(), table.clone());
        Ok(())
    }

    async fn add_columns(
        &self,
        table: &str,
        columns: &BTreeMap<String, String>,
    ) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.add_columns_calls += 1;
        let existing = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DestinationError::reconcile_msg(table, "table does not exist"))?;
        for (name, ty) in columns {
            if existing.columns.contains_key(name) {
                return Err(DestinationError::reconcile_msg(
                    table,
                    format!("column '{name}' already exists"),
                ));
            }
            existing.columns.insert(name.clone(), ty.clone());
        }
        Ok(())
    }

    async fn copy(
        &self,
        staged_object: &str,
        table: &str,
        header: &[String],
    ) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        if state.fail_copy_tables.contains(table) {
            return Err(DestinationError::write_msg(
                format!("simulated copy failure for {table}"),
                true,
            ));
        }

        let existing = state
            .tables
            .get(table)
            .ok_or_else(|| DestinationError::schema_mismatch(table, "table does not exist"))?;
        if let Some(unknown) = header.iter().find(|c| !existing.columns.contains_key(*c)) {
            return Err(DestinationError::schema_mismatch(
                table,
                format!("invalid identifier '{unknown}'"),
            ));
        }

        state.copies.push(CopyCall {
            staged_object: staged_object.to_string(),
            table: table.to_string(),
            header: header.to_vec(),
        });
        Ok(())
    }

    async fn upsert(
        &self,
        table: &Table,
        row: &Row,
        id_column: &str,
    ) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.upsert_calls += 1;
        if self.closed.load(Ordering::SeqCst) {
            return Err(DestinationError::connection_msg("warehouse session is closed"));
        }
        if state.fail_upserts {
            return Err(DestinationError::write_msg("simulated upsert failure", true));
        }

        let existing = state
            .tables
            .get(&table.name)
            .ok_or_else(|| DestinationError::schema_mismatch(&table.name, "table does not exist"))?;
        if let Some(unknown) = row.keys().find(|c| !existing.columns.contains_key(*c)) {
            return Err(DestinationError::schema_mismatch(
                &table.name,
                format!("invalid identifier '{unknown}'"),
            ));
        }

        let id = row.get(id_column).cloned().unwrap_or(Value::Null);
        let rows = state.rows.entry(table.name.clone()).or_default();
        if let Some(index) = rows.iter().position(|r| r.get(id_column) == Some(&id)) {
            rows[index].extend(row.clone());
        } else {
            rows.push(row.clone());
        }
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.rows.remove(table);
        state.truncated.push(table.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        self.closed.store(true, Ordering::SeqCst);
        if state.fail_close {
            return Err(DestinationError::connection_msg("simulated close failure"));
        }
        Ok(())
    }
}

/// Connector handing out [`MockWarehouse`] sessions that share one backend.
///
/// Connecting to a schema that was never created fails with
/// [`DestinationError::SchemaMissing`], like a real backend.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    backend: MockWarehouse,
}

impl MockConnector {
    /// Creates a connector over an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector over an existing backend.
    #[must_use]
    pub fn with_backend(backend: MockWarehouse) -> Self {
        Self { backend }
    }

    /// Marks a schema as existing.
    #[must_use]
    pub fn with_schema(self, schema: impl Into<String>) -> Self {
        lock(&self.backend.state).schemas.insert(schema.into());
        self
    }

    /// Handle on the shared backend.
    #[must_use]
    pub fn backend(&self) -> &MockWarehouse {
        &self.backend
    }

    /// Number of connects.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        lock(&self.backend.state).connect_calls
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockWarehouse;

    async fn connect(&self, schema: Option<&str>) -> Result<MockWarehouse, DestinationError> {
        let mut state = lock(&self.backend.state);
        state.connect_calls += 1;

        if let Some(schema) = schema {
            if !state.schemas.contains(schema) {
                return Err(DestinationError::schema_missing(
                    schema,
                    format!("Schema '{schema}' does not exist or not authorized"),
                ));
            }
        }

        Ok(MockWarehouse {
            schema: schema.map(ToString::to_string),
            state: Arc::clone(&self.backend.state),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_existing_schema_takes_fast_path() {
        let connector = MockConnector::new().with_schema("analytics");

        let session = connect_with_schema(&connector, "analytics").await.unwrap();

        assert_eq!(session.schema(), Some("analytics"));
        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(connector.backend().create_schema_calls(), 0);
        assert_eq!(connector.backend().close_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_is_created_once() {
        let connector = MockConnector::new();

        let session = connect_with_schema(&connector, "analytics").await.unwrap();

        assert_eq!(session.schema(), Some("analytics"));
        assert_eq!(connector.connect_calls(), 3);
        assert_eq!(connector.backend().create_schema_calls(), 1);
        // The schema-less session was closed
        assert_eq!(connector.backend().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_failure_of_bare_session_is_ignored() {
        let connector =
            MockConnector::with_backend(MockWarehouse::new().with_close_failure());

        let session = connect_with_schema(&connector, "s").await.unwrap();
        assert_eq!(session.schema(), Some("s"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let warehouse = MockWarehouse::new().with_table(
            Table::new("users")
                .with_column("id", "text")
                .with_column("name", "text"),
        );
        let table = warehouse.table("users").unwrap();

        warehouse
            .upsert(&table, &row(&[("id", json!("u1")), ("name", json!("a"))]), "id")
            .await
            .unwrap();
        warehouse
            .upsert(&table, &row(&[("id", json!("u1")), ("name", json!("b"))]), "id")
            .await
            .unwrap();

        let rows = warehouse.rows("users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("b"));
    }

    #[tokio::test]
    async fn test_upsert_unknown_column_is_schema_mismatch() {
        let warehouse =
            MockWarehouse::new().with_table(Table::new("t").with_column("id", "text"));
        let table = warehouse.table("t").unwrap();

        let err = warehouse
            .upsert(&table, &row(&[("id", json!(1)), ("x", json!(2))]), "id")
            .await
            .unwrap_err();
        assert!(err.is_schema_mismatch());
    }
}
