//! Batch processor
//!
//! Anchors are queued in memory and handed to the backend in one
//! `submit_anchors` call per flush. The queue lock is only held to append,
//! detach or requeue; never while the backend is working.

use chrono::{DateTime, Utc};
use notary_anchor::{AnchorBackend, SubmitResult, SubmitStatus};
use notary_core::{time, Anchor};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::BatchConfig;

/// An anchor waiting for the next flush
#[derive(Debug, Clone)]
pub struct QueuedAnchor {
    pub anchor: Anchor,
    pub enqueued_at: DateTime<Utc>,
    /// Failed submissions so far
    pub attempts: u32,
}

/// Read-only view of a queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSummary {
    pub anchor_hash: String,
    pub anchor_type: String,
    pub source_id: String,
    #[serde(with = "time::canonical")]
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

/// An anchor taken out of rotation after it could not be submitted
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub anchor: Anchor,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Outcome tag of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStatus {
    /// At least one anchor reached the backend
    Flushed,
    /// Nothing was queued; the backend was not called
    Empty,
    /// Every anchor in the batch failed
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushResult {
    pub status: FlushStatus,
    /// Anchors stored or already present
    pub flushed_count: usize,
    /// Anchors put back at the front of the queue
    pub requeued_count: usize,
    /// Anchors moved to the dead-letter list
    pub dead_lettered: usize,
    pub flushed_at: Option<DateTime<Utc>>,
    /// Backend result per anchor, in queue order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<SubmitResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FlushResult {
    fn empty() -> Self {
        Self {
            status: FlushStatus::Empty,
            flushed_count: 0,
            requeued_count: 0,
            dead_lettered: 0,
            flushed_at: None,
            results: Vec::new(),
            message: Some("queue is empty".to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == FlushStatus::Error
    }
}

/// Returned by [`BatchProcessor::enqueue`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    /// 1-based position in the queue right after the append
    pub position: usize,
    /// Set when the append triggered an automatic flush
    pub flushed: Option<FlushResult>,
}

/// Cumulative queue counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub queue_size: usize,
    pub total_enqueued: u64,
    pub total_flushed: u64,
    pub flush_count: u64,
    pub failed_flushes: u64,
    pub total_requeued: u64,
    pub dead_lettered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<QueuedAnchor>,
    dead_letters: Vec<DeadLetter>,
    last_flush: Instant,
    stats: BatchStats,
}

/// Queues anchors and submits them to a backend in batches
pub struct BatchProcessor {
    backend: Arc<dyn AnchorBackend>,
    config: BatchConfig,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("backend", &self.backend.backend_type())
            .field("config", &self.config)
            .finish()
    }
}

impl BatchProcessor {
    pub fn new(backend: Arc<dyn AnchorBackend>, config: BatchConfig) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dead_letters: Vec::new(),
                last_flush: Instant::now(),
                stats: BatchStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Append an anchor, flushing afterwards if auto-flush is on and due
    pub async fn enqueue(&self, anchor: Anchor) -> EnqueueOutcome {
        let anchor_hash = anchor.anchor_hash().to_hex();
        let position = {
            let mut state = self.state.lock().await;
            state.queue.push_back(QueuedAnchor {
                anchor,
                enqueued_at: time::now(),
                attempts: 0,
            });
            state.stats.total_enqueued += 1;
            state.queue.len()
        };
        debug!(anchor_hash = %anchor_hash, position, "Anchor queued");

        let flushed = if self.config.auto_flush && self.should_flush().await {
            Some(self.flush().await)
        } else {
            None
        };
        EnqueueOutcome { position, flushed }
    }

    /// True when batching is on and the queue is full or the interval has passed
    pub async fn should_flush(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let state = self.state.lock().await;
        state.queue.len() >= self.config.max_batch_size
            || state.last_flush.elapsed() >= self.config.interval()
    }

    /// Submit everything queued so far as one batch.
    ///
    /// The queue is detached first, so anchors enqueued while the backend
    /// works start a new batch. Retryable failures go back to the front of
    /// the queue in their original order; anything else that failed, or
    /// ran out of attempts, is dead-lettered.
    pub async fn flush(&self) -> FlushResult {
        let batch: Vec<QueuedAnchor> = {
            let mut state = self.state.lock().await;
            if state.queue.is_empty() {
                return FlushResult::empty();
            }
            state.queue.drain(..).collect()
        };

        let anchors: Vec<Anchor> = batch.iter().map(|q| q.anchor.clone()).collect();
        info!(count = anchors.len(), backend = %self.backend.backend_type(), "Flushing anchor batch");
        let submitted = self.backend.submit_anchors(&anchors).await;

        let backend = self.backend.backend_type();
        let mut results = submitted.results;
        if results.len() != batch.len() {
            warn!(
                expected = batch.len(),
                received = results.len(),
                "Backend returned a short batch result; treating missing entries as failed"
            );
        }
        results.resize_with(batch.len().max(results.len()), || {
            SubmitResult::error("", backend, "no result returned for anchor", true)
        });
        results.truncate(batch.len());

        let now = time::now();
        let mut flushed_count = 0;
        let mut requeue = Vec::new();
        let mut dead = Vec::new();
        let mut last_error = None;

        for (mut entry, result) in batch.into_iter().zip(results.iter_mut()) {
            if result.anchor_hash.is_empty() {
                result.anchor_hash = entry.anchor.anchor_hash().to_hex();
            }
            match result.status {
                SubmitStatus::Submitted | SubmitStatus::Exists => flushed_count += 1,
                _ => {
                    entry.attempts += 1;
                    let reason = result
                        .message
                        .clone()
                        .unwrap_or_else(|| "submission failed".to_string());
                    last_error = Some(reason.clone());

                    if result.retryable && !self.config.is_exhausted(entry.attempts) {
                        requeue.push(entry);
                    } else {
                        warn!(
                            anchor_hash = %result.anchor_hash,
                            attempts = entry.attempts,
                            retryable = result.retryable,
                            reason = %reason,
                            "Anchor moved to dead-letter list"
                        );
                        dead.push(DeadLetter {
                            anchor: entry.anchor,
                            attempts: entry.attempts,
                            reason,
                            failed_at: now,
                        });
                    }
                }
            }
        }

        let requeued_count = requeue.len();
        let dead_lettered = dead.len();
        let status = if flushed_count > 0 {
            FlushStatus::Flushed
        } else {
            FlushStatus::Error
        };

        {
            let mut state = self.state.lock().await;
            // ahead of anything enqueued during the submission
            for entry in requeue.into_iter().rev() {
                state.queue.push_front(entry);
            }
            state.dead_letters.extend(dead);
            state.stats.total_requeued += requeued_count as u64;
            match status {
                FlushStatus::Flushed => {
                    state.stats.total_flushed += flushed_count as u64;
                    state.stats.flush_count += 1;
                    state.stats.last_flush_at = Some(now);
                    state.last_flush = Instant::now();
                }
                _ => state.stats.failed_flushes += 1,
            }
        }

        if status == FlushStatus::Error {
            warn!(
                requeued = requeued_count,
                dead_lettered,
                error = ?last_error,
                "Anchor batch flush failed"
            );
        } else {
            info!(
                flushed = flushed_count,
                requeued = requeued_count,
                dead_lettered,
                tx_count = submitted.tx_hashes.len(),
                "Anchor batch flushed"
            );
        }

        FlushResult {
            status,
            flushed_count,
            requeued_count,
            dead_lettered,
            flushed_at: (status == FlushStatus::Flushed).then_some(now),
            results,
            message: if status == FlushStatus::Error {
                last_error
            } else {
                None
            },
        }
    }

    /// Summaries of up to `limit` queued anchors, front first
    pub async fn peek(&self, limit: usize) -> Vec<QueuedSummary> {
        let state = self.state.lock().await;
        state
            .queue
            .iter()
            .take(limit)
            .map(|q| QueuedSummary {
                anchor_hash: q.anchor.anchor_hash().to_hex(),
                anchor_type: q.anchor.anchor_type().to_string(),
                source_id: q.anchor.source_id().to_string(),
                enqueued_at: q.enqueued_at,
                attempts: q.attempts,
            })
            .collect()
    }

    /// Discard the queue without submitting; returns how many were dropped
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.queue.len();
        state.queue.clear();
        warn!(count, "Anchor queue cleared without submitting");
        count
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> BatchStats {
        let state = self.state.lock().await;
        BatchStats {
            queue_size: state.queue.len(),
            dead_lettered: state.dead_letters.len(),
            ..state.stats.clone()
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Remove and return the dead-letter list
    pub async fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut self.state.lock().await.dead_letters)
    }

    /// Flush whenever [`Self::should_flush`] says so, until `shutdown` flips to true.
    ///
    /// After a failed flush the next attempt waits according to the
    /// configured backoff instead of `poll_interval`.
    pub async fn run_interval_flush(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = poll_interval.as_millis() as u64, "Interval flusher started");
        let mut failures: u32 = 0;

        loop {
            let wait = if failures == 0 {
                poll_interval
            } else {
                self.config.retry_delay(failures).max(poll_interval)
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if self.is_empty().await || !self.should_flush().await {
                continue;
            }

            let result = self.flush().await;
            match result.status {
                FlushStatus::Error => {
                    failures = failures.saturating_add(1);
                    warn!(
                        failures,
                        next_attempt_secs = self.config.retry_delay(failures).as_secs(),
                        "Interval flush failed, backing off"
                    );
                }
                FlushStatus::Flushed => failures = 0,
                FlushStatus::Empty => {}
            }
        }

        info!("Interval flusher stopped");
    }
}
