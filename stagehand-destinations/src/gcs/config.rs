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

//! Google Cloud Storage stage configuration.

use crate::compression::{object_key, Compression};
use std::fmt;

/// Configuration for the GCS stage.
///
/// The warehouse reads staged files through a named external stage that
/// points at the same bucket, so only the folder and the key are shared with
/// the `COPY` statement.
#[derive(Clone, PartialEq, Eq)]
pub struct GcsConfig {
    /// Bucket name (required).
    pub bucket: String,

    /// Service account key as JSON. Required in batch mode.
    pub service_account_key: Option<String>,

    /// Folder prefix of staged objects (optional).
    pub folder: Option<String>,

    /// Compression algorithm (default: None).
    pub compression: Compression,
}

impl fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsConfig")
            .field("bucket", &self.bucket)
            .field(
                "service_account_key",
                &self.service_account_key.as_ref().map(|_| "<redacted>"),
            )
            .field("folder", &self.folder)
            .field("compression", &self.compression)
            .finish()
    }
}

impl GcsConfig {
    /// Creates a new builder for `GcsConfig`.
    #[must_use]
    pub fn builder() -> GcsConfigBuilder {
        GcsConfigBuilder::default()
    }

    /// Key a staged file is uploaded under.
    #[must_use]
    pub fn object_key(&self, name: &str) -> String {
        object_key(self.folder.as_deref(), name, self.compression)
    }

    /// Checks what uploading requires on top of [`GcsConfigBuilder::build`].
    ///
    /// # Errors
    ///
    /// Returns an error if no service account key is configured.
    pub fn validate_batch_mode(&self) -> Result<(), String> {
        match &self.service_account_key {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err("service_account_key is required in batch mode".to_string()),
        }
    }
}

/// Builder for `GcsConfig`.
#[derive(Debug, Default)]
pub struct GcsConfigBuilder {
    bucket: Option<String>,
    service_account_key: Option<String>,
    folder: Option<String>,
    compression: Option<Compression>,
}

impl GcsConfigBuilder {
    /// Sets the bucket name (required).
    #[must_use]
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Sets the service account key JSON.
    #[must_use]
    pub fn service_account_key(mut self, key: impl Into<String>) -> Self {
        self.service_account_key = Some(key.into());
        self
    }

    /// Sets the folder staged objects are written to.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Sets the compression algorithm (default: None).
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Builds the `GcsConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bucket` is missing or empty.
    pub fn build(self) -> Result<GcsConfig, String> {
        let bucket = self.bucket.ok_or("bucket is required")?;
        if bucket.is_empty() {
            return Err("bucket cannot be empty".to_string());
        }

        Ok(GcsConfig {
            bucket,
            service_account_key: self.service_account_key,
            folder: self.folder.filter(|f| !f.trim_matches('/').is_empty()),
            compression: self.compression.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = GcsConfig::builder().bucket("stage").build().unwrap();

        assert_eq!(config.bucket, "stage");
        assert_eq!(config.folder, None);
        assert_eq!(config.compression, Compression::None);
        assert!(config.validate_batch_mode().is_err());
    }

    #[test]
    fn test_missing_bucket() {
        let err = GcsConfig::builder().build().unwrap_err();
        assert!(err.contains("bucket"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = GcsConfig::builder()
            .bucket("stage")
            .service_account_key("{\"private_key\": \"secret\"}")
            .build()
            .unwrap();

        assert!(config.validate_batch_mode().is_ok());
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_object_key_uses_folder() {
        let config = GcsConfig::builder()
            .bucket("stage")
            .folder("loads/")
            .build()
            .unwrap();
        assert_eq!(config.object_key("f1.dat"), "loads/f1.dat");
    }
}
