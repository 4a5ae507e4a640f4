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

//! Assembling a Snowflake storage from its settings.

use super::adapter::{CopySource, SnowflakeAdapter, SnowflakeConnector};
use super::config::SnowflakeConfig;
use crate::gcs::{GcsConfig, GcsStage};
use crate::s3::{S3Config, S3Stage};
use stagehand_core::config::StorageConfig;
use stagehand_core::destination::DestinationError;
use stagehand_core::event::RawEvent;
use stagehand_core::stage::Stage;
use stagehand_core::storage::{StorageContext, WarehouseStorage};
use stagehand_core::warehouse::connect_with_schema;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// A [`WarehouseStorage`] backed by Snowflake.
pub type SnowflakeStorage = WarehouseStorage<SnowflakeAdapter>;

/// Everything needed to build a [`SnowflakeStorage`].
///
/// At most one of `s3` and `gcs` may be set. Batch mode needs one of them;
/// stream mode ignores both.
#[derive(Debug, Clone)]
pub struct SnowflakeSettings {
    /// Destination-level settings
    pub storage: StorageConfig,
    /// Warehouse connection
    pub snowflake: SnowflakeConfig,
    /// S3 staging bucket
    pub s3: Option<S3Config>,
    /// GCS staging bucket, read through `snowflake.stage`
    pub gcs: Option<GcsConfig>,
}

/// Resolves where staged files go and how `COPY INTO` reads them.
///
/// # Errors
///
/// Returns [`DestinationError::ConfigurationError`] if both S3 and GCS are
/// configured, if batch mode has neither, if GCS is used without a named
/// Snowflake stage, or if the GCS config lacks batch credentials.
pub fn resolve_copy_source(
    settings: &SnowflakeSettings,
) -> Result<Option<CopySource>, DestinationError> {
    if settings.s3.is_some() && settings.gcs.is_some() {
        return Err(DestinationError::configuration(
            "only one of S3 and GCS can be configured",
            None,
        ));
    }

    if settings.storage.mode.is_stream() {
        return Ok(None);
    }

    if let Some(s3) = &settings.s3 {
        return Ok(Some(CopySource::S3(s3.clone())));
    }

    let Some(gcs) = &settings.gcs else {
        return Err(DestinationError::configuration(
            "batch mode requires an S3 or GCS stage",
            None,
        ));
    };

    let stage = settings.snowflake.stage.clone().ok_or_else(|| {
        DestinationError::configuration(
            "a Snowflake stage is required when loading from GCS",
            Some("stage".to_string()),
        )
    })?;
    gcs.validate_batch_mode()
        .map_err(|e| DestinationError::configuration(e, Some("gcs".to_string())))?;

    Ok(Some(CopySource::Gcs {
        stage,
        config: gcs.clone(),
    }))
}

async fn open_stage(source: &CopySource) -> Result<Arc<dyn Stage>, DestinationError> {
    let stage: Arc<dyn Stage> = match source {
        CopySource::S3(config) => Arc::new(S3Stage::new(config.clone()).await?),
        CopySource::Gcs { config, .. } => Arc::new(GcsStage::new(config.clone())?),
    };
    Ok(stage)
}

async fn discard_stage(stage: Option<Arc<dyn Stage>>) {
    if let Some(stage) = stage {
        if let Err(e) = stage.close().await {
            warn!(error = %e, "Failed to close stage after setup error");
        }
    }
}

/// Builds a Snowflake storage.
///
/// Opens the stage (batch mode only), connects to the configured schema
/// and creates it if it does not exist. If connecting fails the stage is
/// closed again. A `queue` starts the streaming worker.
///
/// # Errors
///
/// Returns configuration errors from [`resolve_copy_source`], or the error
/// of opening the stage or connecting.
#[instrument(skip_all, fields(destination_id = %settings.storage.destination_id))]
pub async fn new_snowflake(
    settings: SnowflakeSettings,
    ctx: StorageContext,
    queue: Option<mpsc::Receiver<RawEvent>>,
) -> Result<SnowflakeStorage, DestinationError> {
    let source = resolve_copy_source(&settings)?;
    let stage = match &source {
        Some(source) => Some(open_stage(source).await?),
        None => None,
    };

    let schema = settings.snowflake.schema.clone();
    let connector = match SnowflakeConnector::new(settings.snowflake, source) {
        Ok(connector) => connector,
        Err(e) => {
            discard_stage(stage).await;
            return Err(e);
        }
    };
    let adapter = match connect_with_schema(&connector, &schema).await {
        Ok(adapter) => adapter,
        Err(e) => {
            discard_stage(stage).await;
            return Err(e);
        }
    };

    info!(
        schema = %schema,
        stage = stage.as_ref().map(|s| s.stage_type()),
        "Connected to Snowflake"
    );

    Ok(WarehouseStorage::new(
        settings.storage,
        ctx,
        Arc::new(adapter),
        stage,
        queue,
    ))
}
