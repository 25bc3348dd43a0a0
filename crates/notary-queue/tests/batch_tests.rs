//! Integration tests for the batch processor

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notary_anchor::{
    AnchorBackend, BackendKind, BackendStats, BatchSubmitResult, LedgerConfig, LedgerTestStore,
    ListQuery, MemoryStore, MockAnchorContract, StoredAnchor, SubmitResult, SubmitStatus,
    VerifyResult,
};
use notary_core::{Anchor, Hash};
use notary_queue::{BatchConfig, BatchProcessor, FlushStatus};
use tokio::sync::{watch, Mutex, Notify};

#[derive(Debug, Clone, Default)]
enum FailMode {
    #[default]
    None,
    All {
        retryable: bool,
    },
    Sources(Vec<String>),
}

/// Wraps a memory store, recording each batch and failing on demand
#[derive(Default)]
struct RecordingBackend {
    inner: MemoryStore,
    batches: Mutex<Vec<Vec<String>>>,
    fail: Mutex<FailMode>,
    /// When set, `submit_anchors` signals `entered` and waits for `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingBackend {
    async fn set_fail(&self, mode: FailMode) {
        *self.fail.lock().await = mode;
    }

    async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl AnchorBackend for RecordingBackend {
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult {
        self.inner.submit_anchor(anchor).await
    }

    async fn submit_anchors(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        self.batches
            .lock()
            .await
            .push(anchors.iter().map(|a| a.source_id().to_string()).collect());

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        let mode = self.fail.lock().await.clone();
        let mut results = Vec::new();
        for anchor in anchors {
            let hash = anchor.anchor_hash().to_hex();
            let result = match &mode {
                FailMode::All { retryable } => {
                    SubmitResult::error(hash, BackendKind::InMemory, "node unavailable", *retryable)
                }
                FailMode::Sources(sources) if sources.iter().any(|s| s == anchor.source_id()) => {
                    SubmitResult::error(hash, BackendKind::InMemory, "rejected", true)
                }
                _ => self.inner.submit_anchor(anchor).await,
            };
            results.push(result);
        }
        BatchSubmitResult::from_results(results)
    }

    async fn verify_anchor(&self, anchor_hash: &str) -> VerifyResult {
        self.inner.verify_anchor(anchor_hash).await
    }

    async fn get_anchor(&self, anchor_hash: &str) -> Option<StoredAnchor> {
        self.inner.get_anchor(anchor_hash).await
    }

    async fn list_anchors(&self, query: &ListQuery) -> Vec<StoredAnchor> {
        self.inner.list_anchors(query).await
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn stats(&self) -> BackendStats {
        self.inner.stats().await
    }
}

fn anchor(source: &str) -> Anchor {
    Anchor::new("audit", source, Hash::digest(source.as_bytes()).to_hex()).unwrap()
}

fn config(max_batch_size: usize) -> BatchConfig {
    BatchConfig {
        max_batch_size,
        auto_flush: false,
        ..BatchConfig::default()
    }
}

async fn queued_sources(processor: &BatchProcessor) -> Vec<String> {
    processor
        .peek(usize::MAX)
        .await
        .into_iter()
        .map(|s| s.source_id)
        .collect()
}

#[tokio::test]
async fn test_flush_sends_one_batch() {
    let backend = Arc::new(RecordingBackend::default());
    let processor = BatchProcessor::new(backend.clone(), config(5));

    for s in ["a", "b", "c"] {
        processor.enqueue(anchor(s)).await;
    }
    assert_eq!(processor.stats().await.queue_size, 3);

    let result = processor.flush().await;
    assert_eq!(result.status, FlushStatus::Flushed);
    assert_eq!(result.flushed_count, 3);
    assert!(result.flushed_at.is_some());
    assert_eq!(backend.batch_sizes().await, vec![3]);

    let stats = processor.stats().await;
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.flush_count, 1);
    assert_eq!(stats.total_flushed, 3);
    assert!(stats.last_flush_at.is_some());
}

#[tokio::test]
async fn test_failed_flush_requeues_ahead_of_new_entries() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let backend = Arc::new(RecordingBackend {
        gate: Some((entered.clone(), release.clone())),
        ..RecordingBackend::default()
    });
    backend.set_fail(FailMode::All { retryable: true }).await;
    let processor = Arc::new(BatchProcessor::new(backend.clone(), config(50)));

    for s in ["a", "b", "c"] {
        processor.enqueue(anchor(s)).await;
    }

    let flushing = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.flush().await })
    };

    // the queue is detached while the backend works
    entered.notified().await;
    assert!(processor.is_empty().await);
    processor.enqueue(anchor("d")).await;
    release.notify_one();

    let result = flushing.await.unwrap();
    assert_eq!(result.status, FlushStatus::Error);
    assert_eq!(result.requeued_count, 3);
    assert!(result.message.is_some());

    assert_eq!(queued_sources(&processor).await, vec!["a", "b", "c", "d"]);
    let peeked = processor.peek(4).await;
    assert_eq!(peeked[0].attempts, 1);
    assert_eq!(peeked[3].attempts, 0);

    let stats = processor.stats().await;
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.flush_count, 0);
    assert_eq!(stats.total_requeued, 3);
}

#[tokio::test]
async fn test_partial_failure_requeues_only_failed() {
    let backend = Arc::new(RecordingBackend::default());
    backend.set_fail(FailMode::Sources(vec!["b".to_string()])).await;
    let processor = BatchProcessor::new(backend.clone(), config(50));

    for s in ["a", "b", "c"] {
        processor.enqueue(anchor(s)).await;
    }
    let result = processor.flush().await;
    assert_eq!(result.status, FlushStatus::Flushed);
    assert_eq!(result.flushed_count, 2);
    assert_eq!(result.requeued_count, 1);
    assert_eq!(result.results[1].status, SubmitStatus::Error);
    assert_eq!(queued_sources(&processor).await, vec!["b"]);

    backend.set_fail(FailMode::None).await;
    let retry = processor.flush().await;
    assert_eq!(retry.flushed_count, 1);
    assert!(processor.is_empty().await);
    assert_eq!(backend.batch_sizes().await, vec![3, 1]);
}

#[tokio::test]
async fn test_dead_letter_after_max_attempts() {
    let backend = Arc::new(RecordingBackend::default());
    backend.set_fail(FailMode::All { retryable: true }).await;
    let processor = BatchProcessor::new(
        backend.clone(),
        BatchConfig {
            max_attempts: 2,
            ..config(50)
        },
    );

    processor.enqueue(anchor("a")).await;
    processor.enqueue(anchor("b")).await;

    assert_eq!(processor.flush().await.requeued_count, 2);
    let second = processor.flush().await;
    assert_eq!(second.requeued_count, 0);
    assert_eq!(second.dead_lettered, 2);
    assert!(processor.is_empty().await);

    let dead = processor.dead_letters().await;
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].reason, "node unavailable");
    assert_eq!(processor.stats().await.dead_lettered, 2);

    assert_eq!(processor.take_dead_letters().await.len(), 2);
    assert!(processor.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_non_retryable_failure_is_dead_lettered_immediately() {
    let backend = Arc::new(RecordingBackend::default());
    backend.set_fail(FailMode::All { retryable: false }).await;
    let processor = BatchProcessor::new(backend, config(50));

    processor.enqueue(anchor("a")).await;
    let result = processor.flush().await;
    assert_eq!(result.status, FlushStatus::Error);
    assert_eq!(result.requeued_count, 0);
    assert_eq!(result.dead_lettered, 1);
    assert!(processor.is_empty().await);
}

#[tokio::test]
async fn test_ledger_batch_retried_as_single_transaction() {
    let contract = Arc::new(MockAnchorContract::new());
    let ledger_config = LedgerConfig::testnet()
        .with_chain_id(31_337)
        .with_endpoint("http://127.0.0.1:8545", "0x00000000000000000000000000000000000a0c40");
    let store = Arc::new(LedgerTestStore::with_contract(&ledger_config, contract.clone()).unwrap());
    let processor = BatchProcessor::new(store.clone(), config(50));

    for s in ["a", "b", "c"] {
        processor.enqueue(anchor(s)).await;
    }

    contract.fail_next(1);
    let failed = processor.flush().await;
    assert_eq!(failed.status, FlushStatus::Error);
    assert_eq!(failed.requeued_count, 3);

    let ok = processor.flush().await;
    assert_eq!(ok.status, FlushStatus::Flushed);
    assert_eq!(ok.flushed_count, 3);
    assert_eq!(contract.batch_sizes().await, vec![3]);
    assert_eq!(contract.transaction_count(), 1);
    assert!(store.verify_anchor(&anchor("b").anchor_hash().to_hex()).await.exists);
}

#[tokio::test]
async fn test_interval_flusher_drains_queue() {
    let backend = Arc::new(RecordingBackend::default());
    let processor = Arc::new(BatchProcessor::new(
        backend.clone(),
        BatchConfig {
            interval_seconds: 0,
            ..config(50)
        },
    ));
    let (stop_tx, stop_rx) = watch::channel(false);

    let flusher = {
        let processor = processor.clone();
        tokio::spawn(async move {
            processor
                .run_interval_flush(Duration::from_millis(10), stop_rx)
                .await
        })
    };

    processor.enqueue(anchor("a")).await;
    processor.enqueue(anchor("b")).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !processor.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), flusher)
        .await
        .unwrap()
        .unwrap();
    assert!(processor.stats().await.flush_count >= 1);
}
