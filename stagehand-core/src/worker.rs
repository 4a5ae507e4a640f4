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

//! Streaming worker.
//!
//! Each stream-mode destination owns one background task that drains the
//! destination's event queue and writes events one at a time. The worker
//! never retries; a failed or skipped event is logged, counted and recorded
//! in the outcome cache, and the worker moves on.
//!
//! Shutdown is a broadcast signal checked between events, so a write that
//! already started always completes before the task exits.
//!
//! # Example
//!
//! ```rust
//! use stagehand_core::worker::{EventWriter, StreamingWorker, WriteResult};
//! use stagehand_core::outcome::MemoryOutcomeCache;
//! use stagehand_core::destination::DestinationError;
//! use stagehand_core::event::RawEvent;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventWriter for Printer {
//!     async fn write(&self, event: &RawEvent) -> Result<WriteResult, DestinationError> {
//!         println!("{event:?}");
//!         Ok(WriteResult::Written(vec!["events".to_string()]))
//!     }
//! }
//!
//! # async fn example() -> Result<(), DestinationError> {
//! let (tx, rx) = mpsc::channel(100);
//! let mut worker = StreamingWorker::spawn(
//!     "dest",
//!     rx,
//!     Arc::new(Printer),
//!     Arc::new(MemoryOutcomeCache::default()),
//!     false,
//! );
//!
//! tx.send(RawEvent::new()).await.ok();
//! worker.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::destination::DestinationError;
use crate::event::RawEvent;
use crate::metrics;
use crate::outcome::OutcomeCache;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one streamed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Written to these tables
    Written(Vec<String>),
    /// Dropped on purpose, with the reason
    Skipped(String),
}

/// Writes one event to its destination table(s).
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Writes the event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be written.
    async fn write(&self, event: &RawEvent) -> Result<WriteResult, DestinationError>;
}

/// Counters of a streaming worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Events taken off the queue
    pub events_received: u64,
    /// Events written successfully
    pub writes_succeeded: u64,
    /// Events that failed to write
    pub writes_failed: u64,
    /// Events the processor dropped
    pub events_skipped: u64,
}

/// Owned background task draining one destination's queue.
pub struct StreamingWorker {
    destination_id: String,
    shutdown_tx: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl StreamingWorker {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// The worker stops when [`close`](Self::close) is called or when every
    /// sender of `queue` is dropped.
    #[must_use]
    pub fn spawn(
        destination_id: impl Into<String>,
        queue: mpsc::Receiver<RawEvent>,
        writer: Arc<dyn EventWriter>,
        outcomes: Arc<dyn OutcomeCache>,
        caching_disabled: bool,
    ) -> Self {
        let destination_id = destination_id.into();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let stats = Arc::new(RwLock::new(WorkerStats::default()));

        let handle = tokio::spawn(Self::run(
            destination_id.clone(),
            queue,
            writer,
            outcomes,
            caching_disabled,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        Self {
            destination_id,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            stats,
        }
    }

    #[instrument(skip_all, fields(destination_id = %destination_id))]
    async fn run(
        destination_id: String,
        mut queue: mpsc::Receiver<RawEvent>,
        writer: Arc<dyn EventWriter>,
        outcomes: Arc<dyn OutcomeCache>,
        caching_disabled: bool,
        stats: Arc<RwLock<WorkerStats>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("Streaming worker started");
        metrics::increment_active_streaming_workers();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }

                next = queue.recv() => {
                    let Some(event) = next else {
                        info!("Event queue closed");
                        break;
                    };
                    stats.write().await.events_received += 1;

                    match writer.write(&event).await {
                        Ok(WriteResult::Skipped(reason)) => {
                            debug!(reason = %reason, "Skipped event");
                            metrics::increment_events_skipped(1, &destination_id);
                            stats.write().await.events_skipped += 1;

                            if let Err(e) = outcomes
                                .record_skip(&destination_id, event, &reason)
                                .await
                            {
                                warn!(error = %e, "Failed to record stream skip");
                            }
                        }
                        Ok(WriteResult::Written(tables)) => {
                            debug!(tables = ?tables, "Streamed event");
                            metrics::increment_stream_writes(&destination_id, true);
                            stats.write().await.writes_succeeded += 1;

                            if !caching_disabled {
                                for table in &tables {
                                    if let Err(e) = outcomes
                                        .record_success(&destination_id, event.clone(), table)
                                        .await
                                    {
                                        warn!(error = %e, "Failed to record stream success");
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, retryable = e.is_retryable(), "Failed to stream event");
                            metrics::increment_stream_writes(&destination_id, false);
                            stats.write().await.writes_failed += 1;

                            if let Err(record_err) = outcomes
                                .record_error(&destination_id, event, &e.to_string())
                                .await
                            {
                                warn!(error = %record_err, "Failed to record stream failure");
                            }
                        }
                    }
                }
            }
        }

        metrics::decrement_active_streaming_workers();
        let stats = stats.read().await;
        info!(
            events_received = stats.events_received,
            writes_succeeded = stats.writes_succeeded,
            writes_failed = stats.writes_failed,
            events_skipped = stats.events_skipped,
            "Streaming worker stopped"
        );
    }

    /// Destination this worker writes to.
    #[must_use]
    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    /// Returns the current counters.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Returns `true` until the task has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals shutdown and waits for the task to exit.
    ///
    /// Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the task panicked or was cancelled.
    pub async fn close(&mut self) -> Result<(), DestinationError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have exited on a closed queue.
            let _ = tx.send(());
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match handle.await {
            Ok(()) => {
                debug!(destination_id = %self.destination_id, "Streaming worker joined");
                Ok(())
            }
            Err(e) => {
                error!(destination_id = %self.destination_id, ?e, "Streaming worker panicked");
                Err(DestinationError::other(e, false))
            }
        }
    }
}
