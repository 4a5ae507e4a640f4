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

//! S3 stage implementation.

use crate::s3::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use stagehand_core::destination::DestinationError;
use stagehand_core::stage::Stage;
use std::fmt;
use tracing::{debug, info};

/// Object stage on AWS S3 (or S3-compatible storage like MinIO, LocalStack).
///
/// # Examples
///
/// ```rust,ignore
/// use stagehand_destinations::s3::{S3Config, S3Stage};
/// use stagehand_core::stage::Stage;
///
/// let config = S3Config::builder().bucket("my-stage").build()?;
/// let stage = S3Stage::new(config).await?;
///
/// stage.upload_bytes("f1.dat", b"a|b\n1|2\n".to_vec()).await?;
/// stage.delete_object("f1.dat").await?;
/// ```
pub struct S3Stage {
    /// AWS S3 client
    client: S3Client,

    /// Configuration
    config: S3Config,
}

impl S3Stage {
    /// Creates a new S3 stage with the given configuration.
    ///
    /// Static keys from the configuration take precedence; otherwise the
    /// default credential providers are used (environment variables,
    /// instance profiles, etc.).
    ///
    /// # Errors
    ///
    /// Currently infallible; credentials are resolved on first request.
    pub async fn new(config: S3Config) -> Result<Self, DestinationError> {
        info!(
            bucket = %config.bucket,
            region = %config.region,
            folder = ?config.folder,
            "Initializing S3 stage"
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint_url) = &config.endpoint_url {
            debug!(endpoint_url = %endpoint_url, "Using custom S3 endpoint");
            loader = loader.endpoint_url(endpoint_url);
        }

        if let Some((id, secret)) = config.credentials() {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                id,
                secret,
                None,
                None,
                "stagehand",
            ));
        }

        let aws_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config).retry_config(
            aws_sdk_s3::config::retry::RetryConfig::standard()
                .with_max_attempts(config.max_retries),
        );

        if config.force_path_style {
            debug!("Using path-style S3 addressing");
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        Ok(Self { client, config })
    }

    /// Stage configuration.
    #[must_use]
    pub fn config(&self) -> &S3Config {
        &self.config
    }
}

/// Classifies S3 SDK errors into stage errors with retryability.
fn classify_s3_error<E, R>(key: &str, error: SdkError<E, R>) -> DestinationError
where
    E: std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    let retryable = match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(service_err) => {
            let err_msg = service_err.err().to_string();
            err_msg.contains("SlowDown")
                || err_msg.contains("ServiceUnavailable")
                || err_msg.contains("InternalError")
        }
        _ => false,
    };
    DestinationError::stage(key, error, retryable)
}

#[async_trait]
impl Stage for S3Stage {
    fn stage_type(&self) -> &'static str {
        "s3"
    }

    async fn upload_bytes(&self, name: &str, payload: Vec<u8>) -> Result<(), DestinationError> {
        let key = self.config.object_key(name);
        let data = self.config.compression.compress(payload)?;
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify_s3_error(&key, e))?;

        debug!(bucket = %self.config.bucket, key = %key, bytes = size, "Uploaded staged object");
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError> {
        let key = self.config.object_key(name);

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify_s3_error(&key, e))?;

        debug!(bucket = %self.config.bucket, key = %key, "Deleted staged object");
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        debug!(bucket = %self.config.bucket, "S3 stage closed");
        Ok(())
    }
}
