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

//! Unit tests for S3 stage configuration.

#![cfg(feature = "s3")]

use stagehand_destinations::compression::Compression;
use stagehand_destinations::s3::S3Config;

#[test]
fn test_config_builder_minimal() {
    let config = S3Config::builder().bucket("my-bucket").build().unwrap();

    assert_eq!(config.bucket, "my-bucket");
    assert_eq!(config.region, "us-east-1");
    assert_eq!(config.folder, None);
    assert_eq!(config.compression, Compression::None);
    assert_eq!(config.max_retries, 3);
    assert!(!config.force_path_style);
    assert!(config.credentials().is_none());
}

#[test]
fn test_config_builder_full() {
    let config = S3Config::builder()
        .bucket("analytics-bucket")
        .region("eu-west-1")
        .folder("stagehand/loads")
        .access_key_id("AKIA")
        .secret_access_key("secret")
        .max_retries(5)
        .endpoint_url("http://localhost:4566")
        .force_path_style(true)
        .build()
        .unwrap();

    assert_eq!(config.region, "eu-west-1");
    assert_eq!(config.folder.as_deref(), Some("stagehand/loads"));
    assert_eq!(config.credentials(), Some(("AKIA", "secret")));
    assert_eq!(config.max_retries, 5);
    assert_eq!(
        config.endpoint_url,
        Some("http://localhost:4566".to_string())
    );
    assert_eq!(config.object_key("f1.dat"), "stagehand/loads/f1.dat");
}

#[test]
fn test_config_builder_missing_bucket() {
    let result = S3Config::builder().region("us-east-1").build();

    assert!(result.is_err());
    assert!(result.unwrap_err().contains("bucket"));
}

#[test]
fn test_config_builder_empty_bucket() {
    let result = S3Config::builder().bucket("").build();

    assert!(result.unwrap_err().contains("empty"));
}

#[test]
fn test_config_builder_empty_region() {
    let result = S3Config::builder().bucket("b").region("").build();

    assert!(result.unwrap_err().contains("region"));
}

#[test]
fn test_config_builder_half_credentials() {
    let result = S3Config::builder()
        .bucket("b")
        .access_key_id("AKIA")
        .build();

    assert!(result.unwrap_err().contains("together"));
}

#[test]
fn test_blank_folder_is_dropped() {
    let config = S3Config::builder().bucket("b").folder("/").build().unwrap();

    assert_eq!(config.folder, None);
    assert_eq!(config.object_key("f1.dat"), "f1.dat");
}

#[cfg(feature = "gzip")]
#[test]
fn test_object_key_carries_compression_extension() {
    let config = S3Config::builder()
        .bucket("b")
        .folder("loads")
        .compression(Compression::Gzip)
        .build()
        .unwrap();

    assert_eq!(config.object_key("f1.dat"), "loads/f1.dat.gz");
}
