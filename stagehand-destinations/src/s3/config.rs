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

//! S3 stage configuration.
//!
//! This module provides configuration options for the S3 stage, including:
//! - Bucket, region and folder
//! - Static access keys, also handed to the warehouse for `COPY`
//! - Compression
//! - Custom endpoints for S3-compatible storage

use crate::compression::{object_key, Compression};

/// Configuration for the S3 stage.
///
/// # Examples
///
/// ```rust
/// use stagehand_destinations::s3::S3Config;
///
/// let config = S3Config::builder()
///     .bucket("my-stage-bucket")
///     .folder("snowflake")
///     .access_key_id("AKIA...")
///     .secret_access_key("secret")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.region, "us-east-1");
/// assert_eq!(config.object_key("f1.dat"), "snowflake/f1.dat");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// S3 bucket name (required).
    pub bucket: String,

    /// AWS region (default: `us-east-1`).
    pub region: String,

    /// Folder prefix of staged objects (optional).
    pub folder: Option<String>,

    /// Access key id. Falls back to the default credential chain when unset.
    pub access_key_id: Option<String>,

    /// Secret access key, required together with `access_key_id`.
    pub secret_access_key: Option<String>,

    /// Compression algorithm (default: None).
    pub compression: Compression,

    /// Maximum retries for S3 operations (default: 3).
    ///
    /// The SDK retries throttling errors (429, 503) with exponential backoff.
    pub max_retries: u32,

    /// Custom endpoint URL for S3-compatible storage (e.g., MinIO, LocalStack).
    pub endpoint_url: Option<String>,

    /// Whether to use path-style addressing (default: false).
    ///
    /// Required for: LocalStack, MinIO
    pub force_path_style: bool,
}

impl S3Config {
    /// Creates a new builder for `S3Config`.
    #[must_use]
    pub fn builder() -> S3ConfigBuilder {
        S3ConfigBuilder::default()
    }

    /// Key a staged file is uploaded under.
    #[must_use]
    pub fn object_key(&self, name: &str) -> String {
        object_key(self.folder.as_deref(), name, self.compression)
    }

    /// Returns the static credentials, if both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Builder for `S3Config`.
///
/// Provides a fluent API for constructing S3 configuration with validation.
#[derive(Debug, Default)]
pub struct S3ConfigBuilder {
    bucket: Option<String>,
    region: Option<String>,
    folder: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    compression: Option<Compression>,
    max_retries: Option<u32>,
    endpoint_url: Option<String>,
    force_path_style: Option<bool>,
}

impl S3ConfigBuilder {
    /// Sets the S3 bucket name (required).
    #[must_use]
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Sets the AWS region (default: `us-east-1`).
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the folder staged objects are written to.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Sets the access key id.
    #[must_use]
    pub fn access_key_id(mut self, id: impl Into<String>) -> Self {
        self.access_key_id = Some(id.into());
        self
    }

    /// Sets the secret access key.
    #[must_use]
    pub fn secret_access_key(mut self, secret: impl Into<String>) -> Self {
        self.secret_access_key = Some(secret.into());
        self
    }

    /// Sets the compression algorithm (default: None).
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Sets the maximum number of retries (default: 3).
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets a custom S3 endpoint URL (for S3-compatible storage).
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // LocalStack
    /// builder.endpoint_url("http://localhost:4566")
    ///
    /// // MinIO
    /// builder.endpoint_url("http://minio:9000")
    /// ```
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Forces path-style addressing (required for LocalStack/MinIO).
    #[must_use]
    pub fn force_path_style(mut self, force: bool) -> Self {
        self.force_path_style = Some(force);
        self
    }

    /// Builds the `S3Config`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bucket` is missing or empty
    /// - `region` is empty
    /// - only one of `access_key_id` / `secret_access_key` is set
    pub fn build(self) -> Result<S3Config, String> {
        let bucket = self.bucket.ok_or("bucket is required")?;
        if bucket.is_empty() {
            return Err("bucket cannot be empty".to_string());
        }

        let region = self.region.unwrap_or_else(|| "us-east-1".to_string());
        if region.is_empty() {
            return Err("region cannot be empty".to_string());
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(
                "access_key_id and secret_access_key must be configured together".to_string(),
            );
        }

        Ok(S3Config {
            bucket,
            region,
            folder: self.folder.filter(|f| !f.trim_matches('/').is_empty()),
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            compression: self.compression.unwrap_or_default(),
            max_retries: self.max_retries.unwrap_or(3),
            endpoint_url: self.endpoint_url,
            force_path_style: self.force_path_style.unwrap_or(false),
        })
    }
}
