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

//! Google Cloud Storage object stage.
//!
//! Uploads go through the `object_store` GCS client. The warehouse loads
//! staged files through a named stage pointing at the same bucket.

pub mod config;
mod stage;

pub use config::{GcsConfig, GcsConfigBuilder};
pub use stage::GcsStage;
