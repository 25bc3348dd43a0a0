//! In-process registry contract for tests and local development

use async_trait::async_trait;
use notary_core::Hash;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{
    AnchorContract, BatchOutcome, OnChainAnchor, RecordOutcome, TxOutcome, TxStatus,
    MAX_CONTRACT_BATCH,
};
use crate::error::AnchorError;

const MOCK_CONTRACT: &str = "0x00000000000000000000000000000000000a0c40";
const MOCK_SIGNER: &str = "0x000000000000000000000000000000000000beef";
/// Account behind [`MockAnchorContract::record_foreign`]
const FOREIGN_SIGNER: &str = "0x000000000000000000000000000000000000cafe";

#[derive(Debug, Clone)]
struct MockEntry {
    block: u64,
    timestamp: u64,
    anchor_type: String,
    recorder: String,
}

/// A broadcast write waiting for [`MockAnchorContract::mine_pending`]
#[derive(Debug)]
struct HeldTx {
    tx_hash: String,
    entries: Vec<(Hash, String)>,
}

#[derive(Debug, Default)]
struct MockLedger {
    entries: HashMap<Hash, MockEntry>,
    block: u64,
    batch_sizes: Vec<usize>,
    receipts: HashMap<String, TxOutcome>,
    held: Vec<HeldTx>,
}

impl MockLedger {
    fn record(&mut self, hash: &Hash, anchor_type: &str, recorder: &str) -> bool {
        if self.entries.contains_key(hash) {
            return false;
        }
        let entry = MockEntry {
            block: self.block,
            timestamp: 1_700_000_000 + self.block * 12,
            anchor_type: anchor_type.to_string(),
            recorder: recorder.to_string(),
        };
        self.entries.insert(*hash, entry);
        true
    }
}

/// Mock contract with the same duplicate and revert semantics as the real one
///
/// Write calls can be made to fail with [`MockAnchorContract::set_failing`]
/// or [`MockAnchorContract::fail_next`] to exercise requeue paths.
/// [`MockAnchorContract::hold_mining`] leaves writes broadcast but unmined,
/// and [`MockAnchorContract::set_stale_reads`] makes `exists` lag behind the
/// chain the way a load-balanced node can.
#[derive(Debug)]
pub struct MockAnchorContract {
    ledger: Mutex<MockLedger>,
    signer: Option<String>,
    balance: AtomicU64,
    failing: AtomicBool,
    fail_next: AtomicU32,
    connected: AtomicBool,
    stale_reads: AtomicBool,
    holding: AtomicBool,
    transactions: AtomicU64,
}

impl Default for MockAnchorContract {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnchorContract {
    /// Contract with a funded signing account
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(MockLedger::default()),
            signer: Some(MOCK_SIGNER.to_string()),
            balance: AtomicU64::new(1_000_000_000_000_000_000),
            failing: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            connected: AtomicBool::new(true),
            stale_reads: AtomicBool::new(false),
            holding: AtomicBool::new(false),
            transactions: AtomicU64::new(0),
        }
    }

    /// Contract without a signing account
    pub fn read_only() -> Self {
        Self {
            signer: None,
            ..Self::new()
        }
    }

    /// Make every write fail with a network error until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` writes
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// While set, `exists` answers `false` for every hash
    pub fn set_stale_reads(&self, stale: bool) {
        self.stale_reads.store(stale, Ordering::SeqCst);
    }

    /// While set, writes are broadcast but stay unmined until [`Self::mine_pending`]
    pub fn hold_mining(&self, hold: bool) {
        self.holding.store(hold, Ordering::SeqCst);
    }

    /// Mine every held transaction, in broadcast order; returns how many
    pub async fn mine_pending(&self) -> usize {
        let mut ledger = self.ledger.lock().await;
        let held = std::mem::take(&mut ledger.held);
        let count = held.len();
        for tx in held {
            ledger.block += 1;
            for (hash, anchor_type) in &tx.entries {
                ledger.record(hash, anchor_type, MOCK_SIGNER);
            }
            let block = ledger.block;
            ledger.receipts.insert(
                tx.tx_hash.clone(),
                TxOutcome {
                    tx_hash: tx.tx_hash,
                    block_number: Some(block),
                    gas_used: Some(21_000),
                },
            );
        }
        count
    }

    /// Forget every held transaction, as a node does when it evicts them
    pub async fn drop_pending(&self) -> usize {
        let mut ledger = self.ledger.lock().await;
        std::mem::take(&mut ledger.held).len()
    }

    /// Record a hash from another account, in its own block
    pub async fn record_foreign(&self, hash: &Hash, anchor_type: &str) -> bool {
        let mut ledger = self.ledger.lock().await;
        ledger.block += 1;
        ledger.record(hash, anchor_type, FOREIGN_SIGNER)
    }

    pub fn set_balance(&self, wei: u64) {
        self.balance.store(wei, Ordering::SeqCst);
    }

    /// Transactions sent so far
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Size of each batch call, in call order
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.ledger.lock().await.batch_sizes.clone()
    }

    fn check_write(&self) -> Result<(), AnchorError> {
        if self.signer.is_none() {
            return Err(AnchorError::Configuration("no signing key".to_string()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AnchorError::Network("mock node unreachable".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(AnchorError::Network("mock transient failure".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), AnchorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AnchorError::Network("mock node disconnected".to_string()))
        }
    }

    fn next_tx_hash(&self) -> String {
        let n = self.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        format!("0x{}", Hash::digest(&n.to_be_bytes()).to_hex())
    }

    /// Broadcast a write: mine it now, or hold it and report it pending
    fn send(
        &self,
        ledger: &mut MockLedger,
        entries: &[(Hash, String)],
    ) -> Result<(TxOutcome, u64), AnchorError> {
        let tx_hash = self.next_tx_hash();
        if self.holding.load(Ordering::SeqCst) {
            ledger.held.push(HeldTx {
                tx_hash: tx_hash.clone(),
                entries: entries.to_vec(),
            });
            return Err(AnchorError::Pending { tx_hash });
        }

        ledger.block += 1;
        let recorded = entries
            .iter()
            .filter(|(hash, anchor_type)| ledger.record(hash, anchor_type, MOCK_SIGNER))
            .count() as u64;
        let tx = TxOutcome {
            tx_hash: tx_hash.clone(),
            block_number: Some(ledger.block),
            gas_used: Some(21_000),
        };
        ledger.receipts.insert(tx_hash, tx.clone());
        Ok((tx, recorded))
    }
}

#[async_trait]
impl AnchorContract for MockAnchorContract {
    async fn record_anchor(
        &self,
        hash: &Hash,
        anchor_type: &str,
    ) -> Result<RecordOutcome, AnchorError> {
        self.check_write()?;
        let mut ledger = self.ledger.lock().await;
        if ledger.entries.contains_key(hash) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        let (tx, _) = self.send(&mut ledger, &[(*hash, anchor_type.to_string())])?;
        Ok(RecordOutcome::Recorded(tx))
    }

    async fn record_anchor_strict(
        &self,
        hash: &Hash,
        anchor_type: &str,
    ) -> Result<TxOutcome, AnchorError> {
        self.check_write()?;
        let mut ledger = self.ledger.lock().await;
        if ledger.entries.contains_key(hash) {
            return Err(AnchorError::Reverted("anchor already exists".to_string()));
        }
        let (tx, _) = self.send(&mut ledger, &[(*hash, anchor_type.to_string())])?;
        Ok(tx)
    }

    async fn record_batch(
        &self,
        hashes: &[Hash],
        anchor_types: &[String],
    ) -> Result<BatchOutcome, AnchorError> {
        self.check_write()?;
        if hashes.len() != anchor_types.len() {
            return Err(AnchorError::Reverted("array length mismatch".to_string()));
        }
        if hashes.len() > MAX_CONTRACT_BATCH {
            return Err(AnchorError::Reverted("batch too large".to_string()));
        }

        let mut ledger = self.ledger.lock().await;
        ledger.batch_sizes.push(hashes.len());
        let entries: Vec<(Hash, String)> = hashes.iter().copied().zip(anchor_types.iter().cloned()).collect();
        let (tx, recorded) = self.send(&mut ledger, &entries)?;
        Ok(BatchOutcome { tx, recorded })
    }

    async fn verify(&self, hash: &Hash) -> Result<OnChainAnchor, AnchorError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        Ok(match ledger.entries.get(hash) {
            Some(entry) => OnChainAnchor {
                exists: true,
                timestamp: entry.timestamp,
                anchor_type: entry.anchor_type.clone(),
                recorder: entry.recorder.clone(),
            },
            None => OnChainAnchor {
                exists: false,
                timestamp: 0,
                anchor_type: String::new(),
                recorder: String::new(),
            },
        })
    }

    async fn exists(&self, hash: &Hash) -> Result<bool, AnchorError> {
        self.check_read()?;
        if self.stale_reads.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.ledger.lock().await.entries.contains_key(hash))
    }

    async fn exists_at(&self, hash: &Hash, block: u64) -> Result<bool, AnchorError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        Ok(ledger.entries.get(hash).is_some_and(|e| e.block <= block))
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, AnchorError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        if let Some(tx) = ledger.receipts.get(tx_hash) {
            return Ok(TxStatus::Mined(tx.clone()));
        }
        if ledger.held.iter().any(|h| h.tx_hash == tx_hash) {
            return Ok(TxStatus::Pending);
        }
        Ok(TxStatus::Unknown)
    }

    async fn total_anchors(&self) -> Result<u64, AnchorError> {
        self.check_read()?;
        Ok(self.ledger.lock().await.entries.len() as u64)
    }

    async fn balance(&self) -> Result<u128, AnchorError> {
        self.check_read()?;
        if self.signer.is_none() {
            return Err(AnchorError::Configuration("no signing key".to_string()));
        }
        Ok(self.balance.load(Ordering::SeqCst) as u128)
    }

    fn contract_address(&self) -> String {
        MOCK_CONTRACT.to_string()
    }

    fn signer_address(&self) -> Option<String> {
        self.signer.clone()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
