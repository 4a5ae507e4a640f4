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

//! Object staging area used by the batch path.
//!
//! Batch files are uploaded to a stage, bulk-copied into the warehouse, and
//! deleted once the copy succeeded. A file whose copy failed stays in the
//! stage so the load can be inspected or retried.

use crate::destination::DestinationError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Object storage holding batch files between upload and copy.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Backend type identifier (e.g., "s3", "gcs").
    fn stage_type(&self) -> &'static str;

    /// Uploads `payload` under `name`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::StageError`] if the upload fails.
    async fn upload_bytes(&self, name: &str, payload: Vec<u8>) -> Result<(), DestinationError>;

    /// Deletes the object `name`. Deleting a missing object succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::StageError`] if the delete fails.
    async fn delete_object(&self, name: &str) -> Result<(), DestinationError>;

    /// Releases client resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be shut down cleanly.
    async fn close(&self) -> Result<(), DestinationError>;
}

#[derive(Debug, Default)]
struct MemoryStageState {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: usize,
    deletes: Vec<String>,
    close_calls: usize,
    fail_uploads: bool,
    fail_deletes: bool,
    fail_close: bool,
}

/// In-memory stage for tests and examples.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStage {
    state: Arc<Mutex<MemoryStageState>>,
}

impl MemoryStage {
    /// Creates an empty stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upload fail.
    #[must_use]
    pub fn with_upload_failures(self) -> Self {
        self.lock().fail_uploads = true;
        self
    }

    /// Makes every delete fail.
    #[must_use]
    pub fn with_delete_failures(self) -> Self {
        self.lock().fail_deletes = true;
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub fn with_close_failure(self) -> Self {
        self.lock().fail_close = true;
        self
    }

    /// Names of the objects currently staged.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Contents of a staged object.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(name).cloned()
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    /// Number of successful uploads.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }

    /// Names passed to `delete_object`, in call order.
    #[must_use]
    pub fn deletes(&self) -> Vec<String> {
        self.lock().deletes.clone()
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Stage for MemoryStage {
    fn stage_type(&self) -> &'static str {
        "memory"
    }

    async fn upload_bytes(&self, name: &str, payload: Vec<u8>) -> Result<(), DestinationError> {
        let mut state = self.lock();
        if state.fail_uploads {
            return Err(DestinationError::stage_msg(name, "simulated upload failure", true));
        }
        state.uploads += 1;
        state.objects.insert(name.to_string(), payload);
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError> {
        let mut state = self.lock();
        state.deletes.push(name.to_string());
        if state.fail_deletes {
            return Err(DestinationError::stage_msg(name, "simulated delete failure", true));
        }
        state.objects.remove(name);
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        let mut state = self.lock();
        state.close_calls += 1;
        if state.fail_close {
            return Err(DestinationError::stage_msg("", "simulated close failure", false));
        }
        Ok(())
    }
}
