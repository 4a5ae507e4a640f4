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

//! Stagehand Destinations - warehouse and stage adapters
//!
//! This crate plugs real backends into the storage orchestration of
//! `stagehand-core`.
//!
//! # Available Backends
//!
//! - **Snowflake**: warehouse adapter over the Snowflake SQL API
//! - **S3**: object stage for AWS S3 and S3-compatible storage (MinIO, LocalStack)
//! - **GCS**: object stage for Google Cloud Storage
//!
//! # Features
//!
//! - `snowflake` - Snowflake warehouse (default, pulls in `s3` and `gcs`)
//! - `s3` - S3 stage (default)
//! - `gcs` - Google Cloud Storage stage (default)
//! - `gzip` - Gzip compression of staged files
//! - `zstandard` - Zstandard compression of staged files
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use stagehand_core::config::StorageConfig;
//! use stagehand_core::destination::Storage;
//! use stagehand_core::storage::StorageContext;
//! use stagehand_destinations::s3::S3Config;
//! use stagehand_destinations::snowflake::{new_snowflake, SnowflakeConfig, SnowflakeSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SnowflakeSettings {
//!         storage: StorageConfig::builder().destination_id("events").build()?,
//!         snowflake: SnowflakeConfig::builder()
//!             .account("xy12345.eu-central-1")
//!             .database("ANALYTICS")
//!             .token(std::env::var("SNOWFLAKE_TOKEN")?)
//!             .build()?,
//!         s3: Some(S3Config::builder().bucket("landing").folder("stagehand").build()?),
//!         gcs: None,
//!     };
//!
//!     let storage = new_snowflake(settings, StorageContext::local(), None).await?;
//!     // storage.store("f1.dat", &events, &already_uploaded, false).await?;
//!     storage.close().await?;
//!     Ok(())
//! }
//! ```

pub mod compression;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "gcs")]
pub mod gcs;

#[cfg(feature = "snowflake")]
pub mod snowflake;
