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

//! Google Cloud Storage stage implementation.

use crate::gcs::config::GcsConfig;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use stagehand_core::destination::DestinationError;
use stagehand_core::stage::Stage;
use std::sync::Arc;
use tracing::{debug, info};

/// Object stage on Google Cloud Storage.
pub struct GcsStage {
    store: Arc<dyn ObjectStore>,
    config: GcsConfig,
}

impl GcsStage {
    /// Creates a GCS stage authenticated with the configured service account.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key is missing or the client
    /// cannot be built from it.
    pub fn new(config: GcsConfig) -> Result<Self, DestinationError> {
        config.validate_batch_mode().map_err(|message| {
            DestinationError::configuration(message, Some("service_account_key".to_string()))
        })?;

        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(&config.bucket);
        if let Some(key) = &config.service_account_key {
            builder = builder.with_service_account_key(key);
        }
        let store = builder.build().map_err(|e| {
            DestinationError::configuration(format!("GCS: {e}"), Some("gcs".to_string()))
        })?;

        info!(bucket = %config.bucket, folder = ?config.folder, "Initialized GCS stage");
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Creates a stage over an existing object store.
    ///
    /// Useful with `object_store::memory::InMemory` in tests.
    #[must_use]
    pub fn with_store(config: GcsConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { store, config }
    }

    /// Stage configuration.
    #[must_use]
    pub fn config(&self) -> &GcsConfig {
        &self.config
    }
}

fn classify_gcs_error(key: &str, error: object_store::Error) -> DestinationError {
    let retryable = !matches!(
        error,
        object_store::Error::NotFound { .. }
            | object_store::Error::NotSupported { .. }
            | object_store::Error::NotImplemented
    );
    DestinationError::stage(key, error, retryable)
}

#[async_trait]
impl Stage for GcsStage {
    fn stage_type(&self) -> &'static str {
        "gcs"
    }

    async fn upload_bytes(&self, name: &str, payload: Vec<u8>) -> Result<(), DestinationError> {
        let key = self.config.object_key(name);
        let data = self.config.compression.compress(payload)?;
        let size = data.len();

        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(Bytes::from(data)))
            .await
            .map_err(|e| classify_gcs_error(&key, e))?;

        debug!(bucket = %self.config.bucket, key = %key, bytes = size, "Uploaded staged object");
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError> {
        let key = self.config.object_key(name);

        self.store
            .delete(&ObjectPath::from(key.as_str()))
            .await
            .map_err(|e| classify_gcs_error(&key, e))?;

        debug!(bucket = %self.config.bucket, key = %key, "Deleted staged object");
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        debug!(bucket = %self.config.bucket, "GCS stage closed");
        Ok(())
    }
}
