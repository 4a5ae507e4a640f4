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

//! Snowflake warehouse destination.
//!
//! Statements go through the Snowflake SQL API over HTTPS. Batch loads
//! stage files in S3 or GCS and run `COPY INTO`; streaming writes run one
//! `MERGE` per event.
//!
//! # Example
//!
//! ```rust,no_run
//! use stagehand_core::config::StorageConfig;
//! use stagehand_core::storage::StorageContext;
//! use stagehand_destinations::s3::S3Config;
//! use stagehand_destinations::snowflake::{new_snowflake, SnowflakeConfig, SnowflakeSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SnowflakeSettings {
//!     storage: StorageConfig::builder().destination_id("sf").build()?,
//!     snowflake: SnowflakeConfig::builder()
//!         .account("xy12345.eu-central-1")
//!         .database("ANALYTICS")
//!         .token(std::env::var("SNOWFLAKE_TOKEN")?)
//!         .build()?,
//!     s3: Some(S3Config::builder().bucket("landing").build()?),
//!     gcs: None,
//! };
//!
//! let storage = new_snowflake(settings, StorageContext::local(), None).await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod client;
mod config;
mod destination;

pub use adapter::{
    add_columns_sql, columns_query_sql, copy_sql, create_schema_sql, create_table_sql, merge_sql,
    quote_ident, truncate_sql, CopySource, SnowflakeAdapter, SnowflakeConnector,
};
pub use client::{
    Binding, SnowflakeClient, SnowflakeError, StatementResult, INVALID_IDENTIFIER,
    OBJECT_NOT_EXIST_OR_AUTHORIZED,
};
pub use config::{SnowflakeConfig, SnowflakeConfigBuilder, TokenType, DEFAULT_SCHEMA};
pub use destination::{new_snowflake, resolve_copy_source, SnowflakeSettings, SnowflakeStorage};
