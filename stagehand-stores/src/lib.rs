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

//! Shared-state backends for Stagehand.
//!
//! `stagehand-core` ships process-local implementations of the
//! [`Coordinator`](stagehand_core::coordination::Coordinator) and
//! [`OutcomeCache`](stagehand_core::outcome::OutcomeCache) traits. This
//! crate adds backends that several processes can share.
//!
//! # Available Stores
//!
//! - **Redis** (`redis-store` feature): schema locks and outcome lists
//!
//! # Example: Redis Store
//!
//! ```rust,ignore
//! use stagehand_core::coordination::Coordinator;
//! use stagehand_stores::redis::{RedisConfig, RedisStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::new(
//!     RedisConfig::builder().url("redis://localhost:6379").build()?,
//! )
//! .await?;
//!
//! if store.try_acquire_lock("dest_users", "worker-1", Duration::from_secs(30)).await? {
//!     // alter the table
//!     store.release_lock("dest_users", "worker-1").await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

#[cfg(feature = "redis-store")]
pub mod redis;
