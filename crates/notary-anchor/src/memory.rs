//! In-memory anchor backend
//!
//! Fastest backend with no persistence: everything is gone when the process
//! exits. Intended for tests, development and ephemeral workloads.

use async_trait::async_trait;
use notary_core::{normalize_hash_key, time, Anchor};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::backend::{
    count_by_type, AnchorBackend, BackendDetails, BackendKind, BackendStats, ListQuery,
    StoredAnchor, SubmitResult, VerifyResult,
};

#[derive(Debug, Default)]
struct MemoryState {
    /// anchor hash -> (insertion sequence, record)
    records: HashMap<String, (u64, StoredAnchor)>,
    next_seq: u64,
}

/// Volatile anchor store backed by a locked hash map
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.records.len();
        state.records.clear();
        tracing::info!(count, "Cleared in-memory anchor store");
        count
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AnchorBackend for MemoryStore {
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult {
        let key = anchor.anchor_hash().to_hex();

        // check and insert under one write guard
        let mut state = self.state.write().await;
        if state.records.contains_key(&key) {
            return SubmitResult::exists(key, self.backend_type());
        }

        let stored_at = time::now();
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .records
            .insert(key.clone(), (seq, StoredAnchor::from_anchor(anchor, stored_at)));
        drop(state);

        tracing::debug!(anchor_hash = %key, anchor_type = %anchor.anchor_type(), "Anchor stored in memory");
        SubmitResult::submitted(key, self.backend_type()).with_stored_at(stored_at)
    }

    async fn verify_anchor(&self, anchor_hash: &str) -> VerifyResult {
        let key = normalize_hash_key(anchor_hash);
        let state = self.state.read().await;
        match state.records.get(&key) {
            Some((_, record)) => VerifyResult::found(record, self.backend_type()),
            None => VerifyResult::missing(key, self.backend_type()),
        }
    }

    async fn get_anchor(&self, anchor_hash: &str) -> Option<StoredAnchor> {
        let key = normalize_hash_key(anchor_hash);
        let state = self.state.read().await;
        state.records.get(&key).map(|(_, record)| record.clone())
    }

    async fn list_anchors(&self, query: &ListQuery) -> Vec<StoredAnchor> {
        let mut matching: Vec<(u64, StoredAnchor)> = {
            let state = self.state.read().await;
            state
                .records
                .values()
                .filter(|(_, record)| query.matches(record))
                .cloned()
                .collect()
        };
        // newest insertion first, so equal timestamps list in a stable order
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        query.finish(matching.into_iter().map(|(_, record)| record).collect())
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn stats(&self) -> BackendStats {
        let state = self.state.read().await;
        BackendStats {
            backend_type: self.backend_type(),
            ready: true,
            total_anchors: Some(state.records.len() as u64),
            anchors_by_type: count_by_type(state.records.values().map(|(_, r)| r)),
            details: BackendDetails::Volatile,
        }
    }
}
