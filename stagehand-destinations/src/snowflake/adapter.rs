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

//! Snowflake [`Warehouse`] adapter.
//!
//! Statement text is built by the `*_sql` functions below so it can be
//! checked without a live account. Identifiers are upper-cased and quoted,
//! which matches how Snowflake stores unquoted names; column names read
//! back from `information_schema` are lower-cased again.

use super::client::{Binding, SnowflakeClient, SnowflakeError};
use super::config::SnowflakeConfig;
use crate::gcs::GcsConfig;
use crate::s3::S3Config;
use async_trait::async_trait;
use stagehand_core::batch::Row;
use stagehand_core::destination::DestinationError;
use stagehand_core::schema::{SemanticType, Table};
use stagehand_core::warehouse::{Connector, Warehouse};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Where `COPY INTO` reads staged objects from.
#[derive(Debug, Clone)]
pub enum CopySource {
    /// Direct reads from an S3 bucket.
    S3(S3Config),
    /// Reads through a named external stage over a GCS bucket.
    Gcs {
        /// Snowflake stage name
        stage: String,
        /// Bucket configuration, for object keys
        config: GcsConfig,
    },
}

impl CopySource {
    fn object_key(&self, name: &str) -> String {
        match self {
            Self::S3(config) => config.object_key(name),
            Self::Gcs { config, .. } => config.object_key(name),
        }
    }
}

/// Quotes an identifier the way Snowflake stores it.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.to_uppercase().replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn qualified(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    }
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE SCHEMA IF NOT EXISTS`.
#[must_use]
pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// Columns of one table. Binds schema then table.
///
/// Names are compared exactly against their upper-cased form, the way
/// [`quote_ident`] creates them. `ILIKE` would treat the `_` of normalized
/// names as a wildcard.
#[must_use]
pub fn columns_query_sql() -> &'static str {
    "SELECT column_name, data_type FROM information_schema.columns \
     WHERE table_schema = UPPER(?) AND table_name = UPPER(?) ORDER BY ordinal_position"
}

/// `CREATE TABLE` with the table's columns and primary key.
#[must_use]
pub fn create_table_sql(schema: Option<&str>, table: &Table) -> String {
    let mut definitions: Vec<String> = table
        .columns
        .iter()
        .map(|(name, ty)| format!("{} {ty}", quote_ident(name)))
        .collect();
    if !table.primary_keys.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", column_list(&table.primary_keys)));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(schema, &table.name),
        definitions.join(", ")
    )
}

/// One `ALTER TABLE ... ADD COLUMN` per column.
#[must_use]
pub fn add_columns_sql(
    schema: Option<&str>,
    table: &str,
    columns: &BTreeMap<String, String>,
) -> Vec<String> {
    let target = qualified(schema, table);
    columns
        .iter()
        .map(|(name, ty)| format!("ALTER TABLE {target} ADD COLUMN {} {ty}", quote_ident(name)))
        .collect()
}

/// `COPY INTO` from the staged object, columns in file order.
#[must_use]
pub fn copy_sql(
    schema: Option<&str>,
    table: &str,
    header: &[String],
    source: &CopySource,
    object: &str,
) -> String {
    let key = source.object_key(object);
    let from = match source {
        CopySource::S3(config) => {
            let location = format!("s3://{}/{key}", config.bucket);
            let mut from = format!("FROM {}", quote_literal(&location));
            if let Some((key_id, secret)) = config.credentials() {
                from.push_str(&format!(
                    " CREDENTIALS = (AWS_KEY_ID = {} AWS_SECRET_KEY = {})",
                    quote_literal(key_id),
                    quote_literal(secret)
                ));
            }
            from
        }
        CopySource::Gcs { stage, .. } => {
            format!("FROM @{stage} FILES = ({})", quote_literal(&key))
        }
    };

    format!(
        "COPY INTO {} ({}) {from} FILE_FORMAT = (TYPE = CSV FIELD_DELIMITER = '|' SKIP_HEADER = 1 \
         FIELD_OPTIONALLY_ENCLOSED_BY = '\"' EMPTY_FIELD_AS_NULL = TRUE COMPRESSION = AUTO)",
        qualified(schema, table),
        column_list(header),
    )
}

/// `MERGE` keyed on `id_column` with one positional binding per column.
#[must_use]
pub fn merge_sql(schema: Option<&str>, table: &str, columns: &[&String], id_column: &str) -> String {
    let source = columns
        .iter()
        .map(|c| format!("? AS {}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let id = quote_ident(id_column);
    let updates = columns
        .iter()
        .filter(|c| c.as_str() != id_column)
        .map(|c| format!("t.{0} = s.{0}", quote_ident(c)))
        .collect::<Vec<_>>();
    let names = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>();
    let values = names.iter().map(|c| format!("s.{c}")).collect::<Vec<_>>();

    let mut sql = format!(
        "MERGE INTO {} t USING (SELECT {source}) s ON t.{id} = s.{id}",
        qualified(schema, table)
    );
    if !updates.is_empty() {
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
    }
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        names.join(", "),
        values.join(", ")
    ));
    sql
}

/// `TRUNCATE TABLE IF EXISTS`.
#[must_use]
pub fn truncate_sql(schema: Option<&str>, table: &str) -> String {
    format!("TRUNCATE TABLE IF EXISTS {}", qualified(schema, table))
}

/// A Snowflake session over the SQL API.
#[derive(Debug, Clone)]
pub struct SnowflakeAdapter {
    client: SnowflakeClient,
    source: Option<CopySource>,
}

impl SnowflakeAdapter {
    /// Creates an adapter. Without a copy source the adapter can only
    /// serve single-row writes.
    #[must_use]
    pub fn new(client: SnowflakeClient, source: Option<CopySource>) -> Self {
        Self { client, source }
    }

    /// Schema this session is scoped to.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.client.schema()
    }

    /// Where bulk copies read from.
    #[must_use]
    pub fn copy_source(&self) -> Option<&CopySource> {
        self.source.as_ref()
    }
}

#[async_trait]
impl Warehouse for SnowflakeAdapter {
    fn warehouse_type(&self) -> &'static str {
        "snowflake"
    }

    fn sql_type(&self, ty: SemanticType) -> &'static str {
        match ty {
            SemanticType::String | SemanticType::Object => "text",
            SemanticType::Integer => "bigint",
            SemanticType::Number => "double precision",
            SemanticType::Timestamp => "timestamp(6)",
            SemanticType::Boolean => "boolean",
        }
    }

    #[instrument(skip(self))]
    async fn create_schema(&self, schema: &str) -> Result<(), DestinationError> {
        self.client.execute(&create_schema_sql(schema), &[]).await?;
        info!(schema = %schema, "Created Snowflake schema");
        Ok(())
    }

    async fn get_table(&self, table: &str) -> Result<Option<Table>, DestinationError> {
        let schema = self
            .schema()
            .unwrap_or(self.client.config().schema.as_str())
            .to_string();
        let result = self
            .client
            .execute(columns_query_sql(), &[Binding::text(schema), Binding::text(table)])
            .await?;

        if result.rows.is_empty() {
            return Ok(None);
        }

        let mut found = Table::new(table);
        for row in result.rows {
            let mut values = row.into_iter();
            let (Some(Some(name)), Some(Some(ty))) = (values.next(), values.next()) else {
                continue;
            };
            found.columns.insert(name.to_lowercase(), ty.to_lowercase());
        }
        debug!(table = %table, columns = found.len(), "Read Snowflake table");
        Ok(Some(found))
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn create_table(&self, table: &Table) -> Result<(), DestinationError> {
        self.client
            .execute(&create_table_sql(self.schema(), table), &[])
            .await?;
        info!(columns = table.len(), "Created Snowflake table");
        Ok(())
    }

    async fn add_columns(
        &self,
        table: &str,
        columns: &BTreeMap<String, String>,
    ) -> Result<(), DestinationError> {
        for statement in add_columns_sql(self.schema(), table, columns) {
            self.client.execute(&statement, &[]).await?;
        }
        info!(table = %table, added = columns.len(), "Added Snowflake columns");
        Ok(())
    }

    #[instrument(skip(self, header))]
    async fn copy(
        &self,
        staged_object: &str,
        table: &str,
        header: &[String],
    ) -> Result<(), DestinationError> {
        let source = self.source.as_ref().ok_or_else(|| {
            DestinationError::configuration("bulk copy requires an S3 or GCS stage", None)
        })?;
        let statement = copy_sql(self.schema(), table, header, source, staged_object);

        match self.client.execute(&statement, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_invalid_identifier() => {
                Err(DestinationError::schema_mismatch(table, e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, table: &Table, row: &Row, id_column: &str) -> Result<(), DestinationError> {
        let columns: Vec<&String> = row.keys().collect();
        let bindings: Vec<Binding> = row.values().map(Binding::from_value).collect();
        let statement = merge_sql(self.schema(), &table.name, &columns, id_column);

        match self.client.execute(&statement, &bindings).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_invalid_identifier() => {
                Err(DestinationError::schema_mismatch(&table.name, e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn truncate(&self, table: &str) -> Result<(), DestinationError> {
        self.client
            .execute(&truncate_sql(self.schema(), table), &[])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        // Statements are independent HTTP calls; there is no session to end.
        Ok(())
    }
}

/// Opens [`SnowflakeAdapter`] sessions.
#[derive(Debug, Clone)]
pub struct SnowflakeConnector {
    client: SnowflakeClient,
    source: Option<CopySource>,
}

impl SnowflakeConnector {
    /// Creates a connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SnowflakeConfig, source: Option<CopySource>) -> Result<Self, DestinationError> {
        Ok(Self {
            client: SnowflakeClient::new(config)?,
            source,
        })
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    type Connection = SnowflakeAdapter;

    async fn connect(&self, schema: Option<&str>) -> Result<SnowflakeAdapter, DestinationError> {
        let probe = match schema {
            Some(schema) => format!("DESCRIBE SCHEMA {}", quote_ident(schema)),
            None => "SELECT 1".to_string(),
        };

        match self.client.scoped(None).execute(&probe, &[]).await {
            Ok(_) => Ok(SnowflakeAdapter::new(
                self.client.scoped(schema),
                self.source.clone(),
            )),
            Err(e) if e.is_object_missing() => Err(DestinationError::schema_missing(
                schema.unwrap_or_default(),
                e.to_string(),
            )),
            Err(e) => Err(DestinationError::connection(e)),
        }
    }
}
