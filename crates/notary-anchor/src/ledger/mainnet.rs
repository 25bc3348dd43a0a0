//! Ledger store for production networks
//!
//! Same contract calls as [`LedgerTestStore`], with stricter construction:
//! the chain must be a supported mainnet, and RPC URL, contract address and
//! signing key are all mandatory. Every write spends real funds, so the
//! account balance is logged around batches and reported in stats.

use async_trait::async_trait;
use notary_core::Anchor;
use std::sync::Arc;

use super::{AnchorContract, LedgerConfig, LedgerNetwork, LedgerTestStore};
use crate::backend::{
    AnchorBackend, BackendKind, BackendStats, BatchSubmitResult, ListQuery, StoredAnchor,
    SubmitResult, VerifyResult,
};
use crate::error::AnchorError;

#[derive(Debug)]
pub struct LedgerMainStore {
    inner: LedgerTestStore,
}

impl LedgerMainStore {
    /// Connect to the configured node over JSON-RPC
    #[cfg(feature = "ledger")]
    pub fn new(config: &LedgerConfig) -> Result<Self, AnchorError> {
        Self::check_config(config)?;
        if config.signing_key().is_none() {
            return Err(AnchorError::Configuration(format!(
                "mainnet anchoring requires a signing key in ${}",
                config.private_key_env
            )));
        }
        let contract = super::RpcAnchorContract::new(config)?;
        Self::with_contract(config, Arc::new(contract))
    }

    #[cfg(not(feature = "ledger"))]
    pub fn new(_config: &LedgerConfig) -> Result<Self, AnchorError> {
        Err(AnchorError::Configuration(
            "ledger backends require the `ledger` feature".to_string(),
        ))
    }

    /// Use an already-built contract client; it must be able to sign
    pub fn with_contract(
        config: &LedgerConfig,
        contract: Arc<dyn AnchorContract>,
    ) -> Result<Self, AnchorError> {
        Self::check_config(config)?;
        if contract.signer_address().is_none() {
            return Err(AnchorError::Configuration(
                "mainnet anchoring requires a signing account".to_string(),
            ));
        }
        let inner =
            LedgerTestStore::build(config, LedgerNetwork::Mainnet, BackendKind::PublicMainnet, contract)?;
        Ok(Self { inner })
    }

    fn check_config(config: &LedgerConfig) -> Result<(), AnchorError> {
        LedgerNetwork::Mainnet.check_chain(config.chain_id)?;
        config.rpc_url()?;
        config.contract_address()?;
        Ok(())
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id()
    }

    /// Signing account balance in wei, `None` when the node cannot be reached
    pub async fn balance(&self) -> Option<u128> {
        match self.inner.contract().balance().await {
            Ok(wei) => Some(wei),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read signer balance");
                None
            }
        }
    }
}

#[async_trait]
impl AnchorBackend for LedgerMainStore {
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult {
        self.inner.submit_anchor(anchor).await
    }

    async fn submit_anchors(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        let before = self.balance().await;
        tracing::info!(count = anchors.len(), balance_wei = ?before, "Submitting mainnet anchor batch");

        let result = self.inner.submit_anchors(anchors).await;

        let after = self.balance().await;
        let spent = before.zip(after).map(|(b, a)| b.saturating_sub(a));
        tracing::info!(
            submitted = result.submitted,
            exists = result.exists,
            errors = result.errors,
            transactions = result.tx_hashes.len(),
            balance_wei = ?after,
            spent_wei = ?spent,
            "Mainnet anchor batch finished"
        );
        result
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
        BackendKind::PublicMainnet
    }

    async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }

    async fn stats(&self) -> BackendStats {
        let balance = self.balance().await.map(|wei| wei.to_string());
        self.inner.ledger_stats(balance).await
    }
}
