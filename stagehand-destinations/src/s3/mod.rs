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

//! S3 object stage.
//!
//! Staged files are written to `s3://<bucket>/<folder>/<name>` and loaded by
//! the warehouse straight from there, so the same credentials end up in the
//! `COPY` statement.
//!
//! # Using LocalStack for testing
//!
//! ```rust,ignore
//! let config = S3Config::builder()
//!     .bucket("test-bucket")
//!     .endpoint_url("http://localhost:4566")
//!     .force_path_style(true)
//!     .build()?;
//!
//! let stage = S3Stage::new(config).await?;
//! ```

pub mod config;
mod stage;

pub use config::{S3Config, S3ConfigBuilder};
pub use stage::S3Stage;
