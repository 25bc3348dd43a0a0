//! Ledger store for test networks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_core::{normalize_hash_key, time, Anchor, Hash};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{
    AnchorContract, LedgerConfig, LedgerNetwork, OnChainAnchor, RecordOutcome, TxOutcome, TxStatus,
    MAX_CONTRACT_BATCH,
};
use crate::backend::{
    count_by_type, AnchorBackend, BackendDetails, BackendKind, BackendStats, BatchSubmitResult,
    ListQuery, StoredAnchor, SubmitResult, SubmitStatus, VerifyResult,
};
use crate::error::AnchorError;

const READ_ONLY: &str = "ledger store is read-only: no signing key configured";

/// Most records kept for enriching chain lookups; the oldest are evicted first
pub const KNOWN_CACHE_LIMIT: usize = 10_000;

/// Full records of anchors this process recorded; the contract only keeps hash and type
#[derive(Debug)]
struct KnownCache {
    limit: usize,
    records: HashMap<String, StoredAnchor>,
    order: VecDeque<String>,
}

impl KnownCache {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            records: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, record: StoredAnchor) {
        let key = record.anchor_hash.clone();
        if self.records.insert(key.clone(), record).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    fn get(&self, key: &str) -> Option<&StoredAnchor> {
        self.records.get(key)
    }

    fn values(&self) -> impl Iterator<Item = &StoredAnchor> {
        self.records.values()
    }
}

/// State of an earlier broadcast for a hash about to be submitted again
enum InFlight {
    /// Nothing outstanding; safe to send
    Clear,
    Mined(TxOutcome),
    /// Still unresolved; sending again could pay twice
    Waiting(AnchorError),
}

/// Anchors recorded on a test network through the registry contract
///
/// Existence is checked before every write so duplicates never cost a
/// transaction. Batches go out as one `recordAnchorBatch` call per
/// [`MAX_CONTRACT_BATCH`] hashes.
pub struct LedgerTestStore {
    contract: Arc<dyn AnchorContract>,
    kind: BackendKind,
    chain_id: u64,
    chain_name: &'static str,
    strict: bool,
    submitted: AtomicU64,
    transactions: AtomicU64,
    known: RwLock<KnownCache>,
    /// Broadcast transactions whose receipt never arrived, by anchor hash
    in_flight: Mutex<HashMap<Hash, String>>,
}

impl std::fmt::Debug for LedgerTestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTestStore")
            .field("kind", &self.kind)
            .field("chain_id", &self.chain_id)
            .field("contract", &self.contract.contract_address())
            .field("strict", &self.strict)
            .finish()
    }
}

impl LedgerTestStore {
    /// Connect to the configured node over JSON-RPC
    #[cfg(feature = "ledger")]
    pub fn new(config: &LedgerConfig) -> Result<Self, AnchorError> {
        LedgerNetwork::Testnet.check_chain(config.chain_id)?;
        let contract = super::RpcAnchorContract::new(config)?;
        Self::with_contract(config, Arc::new(contract))
    }

    #[cfg(not(feature = "ledger"))]
    pub fn new(_config: &LedgerConfig) -> Result<Self, AnchorError> {
        Err(AnchorError::Configuration(
            "ledger backends require the `ledger` feature".to_string(),
        ))
    }

    /// Use an already-built contract client
    pub fn with_contract(
        config: &LedgerConfig,
        contract: Arc<dyn AnchorContract>,
    ) -> Result<Self, AnchorError> {
        Self::build(config, LedgerNetwork::Testnet, BackendKind::PublicTestnet, contract)
    }

    pub(super) fn build(
        config: &LedgerConfig,
        network: LedgerNetwork,
        kind: BackendKind,
        contract: Arc<dyn AnchorContract>,
    ) -> Result<Self, AnchorError> {
        let chain_name = network.check_chain(config.chain_id)?;
        if contract.signer_address().is_none() {
            tracing::warn!(chain_id = config.chain_id, "No signing key configured; ledger store is read-only");
        }
        tracing::info!(
            chain = chain_name,
            chain_id = config.chain_id,
            contract = %contract.contract_address(),
            strict = config.strict,
            "Ledger store ready"
        );
        Ok(Self {
            contract,
            kind,
            chain_id: config.chain_id,
            chain_name,
            strict: config.strict,
            submitted: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            known: RwLock::new(KnownCache::new(KNOWN_CACHE_LIMIT)),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub(super) fn contract(&self) -> &Arc<dyn AnchorContract> {
        &self.contract
    }

    pub fn is_read_only(&self) -> bool {
        self.contract.signer_address().is_none()
    }

    async fn remember(&self, anchor: &Anchor, stored_at: DateTime<Utc>, tx_hash: &str) {
        let mut record = StoredAnchor::from_anchor(anchor, stored_at);
        record.recorder = self.contract.signer_address();
        record.tx_hash = Some(tx_hash.to_string());
        self.known.write().await.insert(record);
    }

    fn is_own_recorder(&self, recorder: &str) -> bool {
        self.contract
            .signer_address()
            .is_some_and(|own| own.eq_ignore_ascii_case(recorder))
    }

    /// Whether `hash` was already on chain when `tx` landed, so `tx` skipped it
    async fn recorded_before(&self, hash: &Hash, tx: &TxOutcome) -> bool {
        if let Some(block) = tx.block_number {
            match self.contract.exists_at(hash, block.saturating_sub(1)).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "Historic existence check failed"),
            }
        }
        // written earlier in the same block, or no historic state available
        match self.contract.verify(hash).await {
            Ok(entry) => entry.exists && !self.is_own_recorder(&entry.recorder),
            Err(e) => {
                tracing::debug!(error = %e, "Recorder check failed");
                false
            }
        }
    }

    /// Resolve an earlier broadcast for `hash` before anything new is sent for it
    async fn settle_in_flight(&self, hash: &Hash) -> InFlight {
        let tx_hash = match self.in_flight.lock().await.get(hash) {
            Some(tx_hash) => tx_hash.clone(),
            None => return InFlight::Clear,
        };

        match self.contract.transaction_status(&tx_hash).await {
            Ok(TxStatus::Mined(tx)) => {
                self.in_flight.lock().await.remove(hash);
                InFlight::Mined(tx)
            }
            Ok(TxStatus::Pending) => InFlight::Waiting(AnchorError::Pending { tx_hash }),
            Ok(TxStatus::Unknown) => {
                tracing::warn!(tx_hash = %tx_hash, "Earlier anchor transaction was dropped, sending again");
                self.in_flight.lock().await.remove(hash);
                InFlight::Clear
            }
            Err(e) if e.is_retryable() => InFlight::Waiting(e),
            Err(e) => {
                tracing::debug!(tx_hash = %tx_hash, error = %e, "Earlier anchor transaction failed");
                self.in_flight.lock().await.remove(hash);
                InFlight::Clear
            }
        }
    }

    /// Result for an anchor whose earlier transaction has since been mined
    async fn settled(&self, anchor: &Anchor, tx: TxOutcome) -> SubmitResult {
        let key = anchor.anchor_hash().to_hex();
        if self.recorded_before(anchor.anchor_hash(), &tx).await {
            return SubmitResult::exists(key, self.kind);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let stored_at = time::now();
        self.remember(anchor, stored_at, &tx.tx_hash).await;
        tracing::info!(anchor_hash = %key, tx_hash = %tx.tx_hash, "Earlier anchor transaction mined");
        SubmitResult::submitted(key, self.kind)
            .with_tx_hash(tx.tx_hash)
            .with_stored_at(stored_at)
    }

    /// Track a broadcast that timed out so it is not paid for twice
    async fn note_pending(&self, hashes: &[Hash], err: &AnchorError) {
        if let AnchorError::Pending { tx_hash } = err {
            self.transactions.fetch_add(1, Ordering::Relaxed);
            let mut in_flight = self.in_flight.lock().await;
            for hash in hashes {
                in_flight.insert(*hash, tx_hash.clone());
            }
        }
    }

    async fn lookup(&self, anchor_hash: &str) -> Result<(String, OnChainAnchor), (String, AnchorError)> {
        let key = normalize_hash_key(anchor_hash);
        let hash = Hash::from_hex(&key).map_err(|e| (key.clone(), AnchorError::from(e)))?;
        match self.contract.verify(&hash).await {
            Ok(entry) => Ok((key, entry)),
            Err(e) => Err((key, e)),
        }
    }

    pub(super) async fn ledger_stats(&self, balance_wei: Option<String>) -> BackendStats {
        let ready = self.contract.is_connected().await;
        let total_anchors = match self.contract.total_anchors().await {
            Ok(total) => Some(total),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read on-chain anchor total");
                None
            }
        };
        let anchors_by_type = count_by_type(self.known.read().await.values());
        BackendStats {
            backend_type: self.kind,
            ready,
            total_anchors,
            anchors_by_type,
            details: BackendDetails::Ledger {
                network: self.chain_name.to_string(),
                chain_id: self.chain_id,
                contract_address: self.contract.contract_address(),
                signer: self.contract.signer_address(),
                strict: self.strict,
                submitted_count: self.submitted.load(Ordering::Relaxed),
                transaction_count: self.transactions.load(Ordering::Relaxed),
                balance_wei,
            },
        }
    }
}

fn chain_time(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(time::now)
}

#[async_trait]
impl AnchorBackend for LedgerTestStore {
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult {
        let hash = anchor.anchor_hash();
        let key = hash.to_hex();
        if self.is_read_only() {
            return SubmitResult::error(key, self.kind, READ_ONLY, false);
        }

        match self.settle_in_flight(hash).await {
            InFlight::Clear => {}
            InFlight::Mined(tx) => return self.settled(anchor, tx).await,
            InFlight::Waiting(e) => return SubmitResult::from_error(key, self.kind, &e),
        }

        match self.contract.exists(hash).await {
            Ok(true) => {
                tracing::debug!(anchor_hash = %key, "Anchor already on chain, skipping transaction");
                return SubmitResult::exists(key, self.kind);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(anchor_hash = %key, error = %e, "Existence check failed");
                return SubmitResult::from_error(key, self.kind, &e);
            }
        }

        let anchor_type = anchor.anchor_type().to_string();
        let outcome = if self.strict {
            self.contract
                .record_anchor_strict(hash, &anchor_type)
                .await
                .map(Some)
        } else {
            self.contract
                .record_anchor(hash, &anchor_type)
                .await
                .map(|outcome| match outcome {
                    RecordOutcome::Recorded(tx) => Some(tx),
                    RecordOutcome::AlreadyRecorded => None,
                })
        };

        match outcome {
            Ok(Some(tx)) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                self.transactions.fetch_add(1, Ordering::Relaxed);
                let stored_at = time::now();
                self.remember(anchor, stored_at, &tx.tx_hash).await;
                tracing::info!(
                    anchor_hash = %key,
                    tx_hash = %tx.tx_hash,
                    block = ?tx.block_number,
                    chain_id = self.chain_id,
                    "Anchor recorded on chain"
                );
                SubmitResult::submitted(key, self.kind)
                    .with_tx_hash(tx.tx_hash)
                    .with_stored_at(stored_at)
            }
            Ok(None) => SubmitResult::exists(key, self.kind),
            Err(e) => {
                tracing::error!(anchor_hash = %key, error = %e, "Ledger write failed");
                self.note_pending(std::slice::from_ref(hash), &e).await;
                SubmitResult::from_error(key, self.kind, &e)
            }
        }
    }

    async fn submit_anchors(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        if anchors.is_empty() {
            return BatchSubmitResult::default();
        }
        if self.is_read_only() {
            let results = anchors
                .iter()
                .map(|a| SubmitResult::error(a.anchor_hash().to_hex(), self.kind, READ_ONLY, false))
                .collect();
            return BatchSubmitResult::from_results(results);
        }

        let mut results: Vec<Option<SubmitResult>> = vec![None; anchors.len()];
        let mut first_seen: HashMap<Hash, usize> = HashMap::new();
        let mut duplicates: Vec<(usize, usize)> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();

        for (idx, anchor) in anchors.iter().enumerate() {
            let hash = *anchor.anchor_hash();
            if let Some(&first) = first_seen.get(&hash) {
                duplicates.push((idx, first));
                continue;
            }
            first_seen.insert(hash, idx);

            let key = hash.to_hex();
            match self.settle_in_flight(&hash).await {
                InFlight::Clear => {}
                InFlight::Mined(tx) => {
                    results[idx] = Some(self.settled(anchor, tx).await);
                    continue;
                }
                InFlight::Waiting(e) => {
                    results[idx] = Some(SubmitResult::from_error(key, self.kind, &e));
                    continue;
                }
            }

            match self.contract.exists(&hash).await {
                Ok(true) => results[idx] = Some(SubmitResult::exists(key, self.kind)),
                Ok(false) => pending.push(idx),
                Err(e) => {
                    tracing::warn!(anchor_hash = %key, error = %e, "Existence check failed");
                    results[idx] = Some(SubmitResult::from_error(key, self.kind, &e));
                }
            }
        }

        let mut tx_hashes = Vec::new();
        for chunk in pending.chunks(MAX_CONTRACT_BATCH) {
            let hashes: Vec<Hash> = chunk.iter().map(|&i| *anchors[i].anchor_hash()).collect();
            let types: Vec<String> = chunk
                .iter()
                .map(|&i| anchors[i].anchor_type().to_string())
                .collect();

            match self.contract.record_batch(&hashes, &types).await {
                Ok(outcome) => {
                    self.transactions.fetch_add(1, Ordering::Relaxed);
                    self.submitted.fetch_add(outcome.recorded, Ordering::Relaxed);

                    // the contract skips hashes recorded since the pre-check
                    let mut skipped = vec![false; chunk.len()];
                    if outcome.recorded < chunk.len() as u64 {
                        for (slot, hash) in skipped.iter_mut().zip(&hashes) {
                            *slot = self.recorded_before(hash, &outcome.tx).await;
                        }
                        tracing::warn!(
                            sent = chunk.len(),
                            recorded = outcome.recorded,
                            skipped = skipped.iter().filter(|s| **s).count(),
                            "Batch entries were recorded by another writer"
                        );
                    }
                    tracing::info!(
                        count = chunk.len(),
                        tx_hash = %outcome.tx.tx_hash,
                        chain_id = self.chain_id,
                        "Anchor batch recorded on chain"
                    );
                    let stored_at = time::now();
                    for (&i, skipped) in chunk.iter().zip(skipped) {
                        if skipped {
                            results[i] = Some(SubmitResult::exists(anchors[i].anchor_hash().to_hex(), self.kind));
                            continue;
                        }
                        self.remember(&anchors[i], stored_at, &outcome.tx.tx_hash).await;
                        results[i] = Some(
                            SubmitResult::submitted(anchors[i].anchor_hash().to_hex(), self.kind)
                                .with_tx_hash(outcome.tx.tx_hash.clone())
                                .with_stored_at(stored_at),
                        );
                    }
                    tx_hashes.push(outcome.tx.tx_hash);
                }
                Err(e) => {
                    tracing::error!(count = chunk.len(), error = %e, "Ledger batch write failed");
                    self.note_pending(&hashes, &e).await;
                    for &i in chunk {
                        results[i] = Some(SubmitResult::from_error(
                            anchors[i].anchor_hash().to_hex(),
                            self.kind,
                            &e,
                        ));
                    }
                }
            }
        }

        for (idx, first) in duplicates {
            let copy = match &results[first] {
                Some(r) if r.status == SubmitStatus::Submitted => {
                    SubmitResult::exists(r.anchor_hash.clone(), self.kind)
                }
                Some(r) => r.clone(),
                None => SubmitResult::error(
                    anchors[idx].anchor_hash().to_hex(),
                    self.kind,
                    "no result for duplicate entry",
                    false,
                ),
            };
            results[idx] = Some(copy);
        }

        let results = results
            .into_iter()
            .zip(anchors)
            .map(|(r, a)| {
                r.unwrap_or_else(|| {
                    SubmitResult::error(a.anchor_hash().to_hex(), self.kind, "anchor was not processed", true)
                })
            })
            .collect();
        BatchSubmitResult::from_results(results).with_tx_hashes(tx_hashes)
    }

    async fn verify_anchor(&self, anchor_hash: &str) -> VerifyResult {
        let (key, entry) = match self.lookup(anchor_hash).await {
            Ok(found) => found,
            Err((key, e)) => {
                tracing::warn!(anchor_hash = %key, error = %e, "Ledger verification failed");
                let mut result = VerifyResult::missing(key, self.kind);
                result.message = Some(e.to_string());
                return result;
            }
        };
        if !entry.exists {
            return VerifyResult::missing(key, self.kind);
        }

        let source_id = self
            .known
            .read()
            .await
            .get(&key)
            .and_then(|r| r.source_id.clone());
        VerifyResult {
            exists: true,
            anchor_hash: key,
            backend: self.kind,
            anchor_type: Some(entry.anchor_type),
            source_id,
            timestamp: Some(chain_time(entry.timestamp)),
            recorder: Some(entry.recorder),
            message: None,
        }
    }

    async fn get_anchor(&self, anchor_hash: &str) -> Option<StoredAnchor> {
        let (key, entry) = match self.lookup(anchor_hash).await {
            Ok(found) => found,
            Err((key, e)) => {
                tracing::warn!(anchor_hash = %key, error = %e, "Ledger lookup failed");
                return None;
            }
        };
        if !entry.exists {
            return None;
        }

        let recorded_at = chain_time(entry.timestamp);
        if let Some(known) = self.known.read().await.get(&key) {
            let mut record = known.clone();
            record.stored_at = recorded_at;
            record.recorder = Some(entry.recorder);
            return Some(record);
        }
        Some(StoredAnchor {
            anchor_hash: key,
            anchor_type: entry.anchor_type,
            source_id: None,
            data_hash: None,
            participants: Vec::new(),
            metadata: Default::default(),
            timestamp: recorded_at,
            previous_anchor_ref: None,
            stored_at: recorded_at,
            recorder: Some(entry.recorder),
            tx_hash: None,
        })
    }

    async fn list_anchors(&self, _query: &ListQuery) -> Vec<StoredAnchor> {
        tracing::warn!(
            chain_id = self.chain_id,
            "Listing ledger anchors requires an event indexer; returning no results"
        );
        Vec::new()
    }

    fn backend_type(&self) -> BackendKind {
        self.kind
    }

    async fn is_ready(&self) -> bool {
        self.contract.is_connected().await
    }

    async fn stats(&self) -> BackendStats {
        self.ledger_stats(None).await
    }
}
