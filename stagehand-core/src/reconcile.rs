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

//! Schema reconciliation.
//!
//! The reconciler turns an inferred [`TableSchema`] into a native [`Table`]
//! and makes sure the warehouse table has at least those columns. Tables are
//! only ever widened: missing columns are added, existing column types are
//! never changed.
//!
//! Reconciled tables are cached per `(destination, table)`. The streaming
//! path reads through the cache; the batch path always checks the backend,
//! because a failed copy is far more expensive than one `get_table`.

use crate::config::StorageConfig;
use crate::coordination::{acquire_with_timeout, Coordinator};
use crate::destination::DestinationError;
use crate::metrics;
use crate::schema::{normalize_identifier, SemanticType, Table, TableSchema};
use crate::warehouse::Warehouse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

type CacheKey = (String, String);

/// Creates and widens warehouse tables, caching the result.
pub struct SchemaReconciler<W: Warehouse> {
    warehouse: Arc<W>,
    coordinator: Arc<dyn Coordinator>,
    cache: RwLock<HashMap<CacheKey, Table>>,
    primary_key_fields: BTreeSet<String>,
    max_columns: Option<usize>,
    lock_ttl: Duration,
    lock_wait: Duration,
}

impl<W: Warehouse> SchemaReconciler<W> {
    /// Creates a reconciler for one warehouse session.
    #[must_use]
    pub fn new(warehouse: Arc<W>, coordinator: Arc<dyn Coordinator>, config: &StorageConfig) -> Self {
        Self {
            warehouse,
            coordinator,
            cache: RwLock::new(HashMap::new()),
            primary_key_fields: config.primary_key_fields.clone(),
            max_columns: config.max_columns,
            lock_ttl: config.lock_ttl,
            lock_wait: config.lock_wait,
        }
    }

    /// Maps an inferred schema to the desired native table.
    ///
    /// Names are normalized. Columns that normalize to the same name have
    /// their types widened together; since the input is ordered the result
    /// does not depend on event order. Configured primary key fields present
    /// in the schema become the table's primary key.
    #[must_use]
    pub fn map_to_table(&self, schema: &TableSchema) -> Table {
        let mut merged: BTreeMap<String, SemanticType> = BTreeMap::new();
        for (column, ty) in &schema.columns {
            merged
                .entry(normalize_identifier(column))
                .and_modify(|existing| *existing = existing.widen(*ty))
                .or_insert(*ty);
        }

        let mut table = Table::new(normalize_identifier(&schema.name));
        for (column, ty) in merged {
            if self.primary_key_fields.contains(&column) {
                table.primary_keys.insert(column.clone());
            }
            table.columns.insert(column, self.warehouse.sql_type(ty).to_string());
        }
        table
    }

    /// Makes sure the warehouse table has every column of `desired`.
    ///
    /// With `use_cache`, a cached table that already has every desired
    /// column is returned without contacting the backend. Otherwise the
    /// table is read and created or widened under the schema lock
    /// `"{destination_id}_{table}"`, and the cache is refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::ReconcileError`] if the lock cannot be
    /// taken, the table would exceed the column limit, or DDL fails.
    #[instrument(skip(self, desired), fields(table = %desired.name))]
    pub async fn ensure_table(
        &self,
        destination_id: &str,
        desired: &Table,
        use_cache: bool,
    ) -> Result<Table, DestinationError> {
        let key = (destination_id.to_string(), desired.name.clone());

        if use_cache {
            if let Some(cached) = self.cache.read().await.get(&key) {
                if cached.contains_all(desired) {
                    return Ok(cached.clone());
                }
            }
        }

        metrics::increment_schema_reconciliations(destination_id);

        // One owner per call, so concurrent calls on this reconciler exclude each other
        let lock_key = format!("{destination_id}_{}", desired.name);
        let owner_id = uuid::Uuid::new_v4().to_string();
        acquire_with_timeout(
            self.coordinator.as_ref(),
            &lock_key,
            &owner_id,
            self.lock_ttl,
            self.lock_wait,
        )
        .await
        .map_err(|e| {
            DestinationError::reconcile_msg(
                &desired.name,
                format!("failed to acquire schema lock: {e}"),
            )
        })?;

        let result = self.reconcile_locked(desired).await;

        match self.coordinator.release_lock(&lock_key, &owner_id).await {
            Ok(true) => {}
            Ok(false) => warn!(lock_key = %lock_key, "Schema lock expired before release"),
            Err(e) => warn!(lock_key = %lock_key, error = %e, "Failed to release schema lock"),
        }

        let table = result.map_err(|e| match e {
            DestinationError::ReconcileError { .. } => e,
            other => DestinationError::reconcile(&desired.name, other),
        })?;

        self.cache.write().await.insert(key, table.clone());
        Ok(table)
    }

    async fn reconcile_locked(&self, desired: &Table) -> Result<Table, DestinationError> {
        match self.warehouse.get_table(&desired.name).await? {
            None => {
                self.check_column_limit(&desired.name, desired.len())?;
                self.warehouse.create_table(desired).await?;
                info!(columns = desired.len(), "Created table");
                Ok(desired.clone())
            }
            Some(mut existing) => {
                let missing = existing.missing_columns(desired);
                if missing.is_empty() {
                    debug!("Table is up to date");
                    return Ok(existing);
                }

                self.check_column_limit(&desired.name, existing.len() + missing.len())?;
                self.warehouse.add_columns(&desired.name, &missing).await?;
                info!(added = ?missing.keys().collect::<Vec<_>>(), "Added columns");

                existing.columns.extend(missing);
                Ok(existing)
            }
        }
    }

    fn check_column_limit(&self, table: &str, columns: usize) -> Result<(), DestinationError> {
        match self.max_columns {
            Some(max) if columns > max => Err(DestinationError::reconcile_msg(
                table,
                format!("table would have {columns} columns, limit is {max}"),
            )),
            _ => Ok(()),
        }
    }

    /// Drops the cached definition of a table.
    pub async fn invalidate(&self, destination_id: &str, table: &str) {
        let key = (destination_id.to_string(), table.to_string());
        if self.cache.write().await.remove(&key).is_some() {
            debug!(destination_id = %destination_id, table = %table, "Invalidated cached table");
        }
    }

    /// Cached definition of a table, if any.
    pub async fn cached(&self, destination_id: &str, table: &str) -> Option<Table> {
        self.cache
            .read()
            .await
            .get(&(destination_id.to_string(), table.to_string()))
            .cloned()
    }

    /// The warehouse session this reconciler works against.
    #[must_use]
    pub fn warehouse(&self) -> &Arc<W> {
        &self.warehouse
    }
}
