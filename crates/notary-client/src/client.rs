//! Client façade over a backend and a batch processor

use notary_anchor::{
    create_backend, AnchorBackend, AnchorError, BackendKind, BackendStats, BatchSubmitResult,
    ListQuery, MemoryStore, StoredAnchor, SubmitResult, VerifyResult,
};
use notary_core::Anchor;
use notary_queue::{BatchProcessor, BatchStats, FlushResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::NotaryConfig;
use crate::error::ClientError;

/// How [`AnchorClient::submit`] hands an anchor over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Submit to the backend now
    #[default]
    Immediate,
    /// Queue for the next batch flush; immediate when batching is off
    Batched,
}

/// Liveness summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub enabled: bool,
    pub backend: BackendKind,
    pub ready: bool,
    pub batching_enabled: bool,
    pub queue_size: usize,
    pub dead_letters: usize,
}

/// Counters from the backend and the batch queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub enabled: bool,
    pub backend: BackendStats,
    pub batch: BatchStats,
}

/// Entry point for anchoring
///
/// Owns one backend and one batch processor feeding it. Cheap to share
/// behind an `Arc`; every method takes `&self`.
pub struct AnchorClient {
    config: NotaryConfig,
    backend: Arc<dyn AnchorBackend>,
    batch: Arc<BatchProcessor>,
}

impl std::fmt::Debug for AnchorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorClient")
            .field("enabled", &self.config.enabled)
            .field("backend", &self.backend.backend_type())
            .finish()
    }
}

impl AnchorClient {
    /// Build the configured backend and a batch processor for it.
    ///
    /// A disabled client gets an in-memory placeholder, so an unfinished
    /// ledger configuration does not block startup while anchoring is off.
    pub fn new(config: NotaryConfig) -> Result<Self, AnchorError> {
        let backend: Arc<dyn AnchorBackend> = if config.enabled {
            create_backend(&config.backend)?
        } else {
            tracing::info!("Anchoring disabled; submissions will not be stored");
            Arc::new(MemoryStore::new())
        };
        Ok(Self::with_backend(config, backend))
    }

    /// Use an already-built backend
    pub fn with_backend(config: NotaryConfig, backend: Arc<dyn AnchorBackend>) -> Self {
        let batch = Arc::new(BatchProcessor::new(backend.clone(), config.batching.clone()));
        Self {
            config,
            backend,
            batch,
        }
    }

    /// Configuration from `NOTARY_*` environment variables
    pub fn from_env() -> Result<Self, ClientError> {
        let config = NotaryConfig::from_env()?;
        Ok(Self::new(config)?)
    }

    pub fn config(&self) -> &NotaryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn backend(&self) -> &Arc<dyn AnchorBackend> {
        &self.backend
    }

    /// The queue behind [`SubmitMode::Batched`], for interval flushing and dead letters
    pub fn batch_processor(&self) -> &Arc<BatchProcessor> {
        &self.batch
    }

    pub async fn submit(&self, anchor: Anchor, mode: SubmitMode) -> SubmitResult {
        let anchor_hash = anchor.anchor_hash().to_hex();
        if !self.config.enabled {
            return SubmitResult::disabled(anchor_hash);
        }

        if mode == SubmitMode::Batched && self.config.batching.enabled {
            let outcome = self.batch.enqueue(anchor).await;
            let mut result = SubmitResult::queued(anchor_hash, outcome.position);
            result.backend = Some(self.backend.backend_type());
            return result;
        }

        self.backend.submit_anchor(&anchor).await
    }

    pub async fn submit_all(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        if !self.config.enabled {
            return BatchSubmitResult::from_results(
                anchors
                    .iter()
                    .map(|a| SubmitResult::disabled(a.anchor_hash().to_hex()))
                    .collect(),
            );
        }
        self.backend.submit_anchors(anchors).await
    }

    pub async fn verify(&self, anchor_hash: &str) -> VerifyResult {
        self.backend.verify_anchor(anchor_hash).await
    }

    pub async fn get(&self, anchor_hash: &str) -> Option<StoredAnchor> {
        self.backend.get_anchor(anchor_hash).await
    }

    pub async fn list(&self, query: &ListQuery) -> Vec<StoredAnchor> {
        self.backend.list_anchors(query).await
    }

    pub async fn flush_batch(&self) -> FlushResult {
        self.batch.flush().await
    }

    pub async fn status(&self) -> ClientStatus {
        let batch = self.batch.stats().await;
        ClientStatus {
            enabled: self.config.enabled,
            backend: self.backend.backend_type(),
            ready: self.backend.is_ready().await,
            batching_enabled: self.config.batching.enabled,
            queue_size: batch.queue_size,
            dead_letters: batch.dead_lettered,
        }
    }

    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            enabled: self.config.enabled,
            backend: self.backend.stats().await,
            batch: self.batch.stats().await,
        }
    }

    /// Flush whatever is still queued
    pub async fn shutdown(&self) -> FlushResult {
        let pending = self.batch.len().await;
        tracing::info!(pending, "Shutting down anchor client");
        let result = self.batch.flush().await;
        if result.is_error() || result.requeued_count > 0 {
            tracing::warn!(
                requeued = result.requeued_count,
                "Anchors still queued at shutdown"
            );
        }
        result
    }
}
