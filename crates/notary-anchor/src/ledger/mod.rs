//! Ledger-backed anchoring
//!
//! Anchors are recorded by an external registry contract on an EVM chain.
//! The stores here only drive that contract:
//!
//! | call                              | behaviour                                             |
//! |-----------------------------------|-------------------------------------------------------|
//! | `recordAnchor(hash, type)`        | returns `false` on duplicates, never reverts for them |
//! | `recordAnchorStrict(hash, type)`  | reverts on duplicates                                 |
//! | `recordAnchorBatch(hashes, types)`| skips existing entries, max 100 per call              |
//! | `verifyAnchor(hash)`              | `(exists, timestamp, type, recorder)`                 |
//! | `anchorExists(hash)`              | `bool`                                                |
//! | `totalAnchors()`                  | `uint256`                                             |
//!
//! Every write costs gas, so the stores check existence first and group
//! batches into as few transactions as the contract cap allows.

mod mainnet;
mod mock;
#[cfg(feature = "ledger")]
mod rpc;
mod testnet;

pub use mainnet::LedgerMainStore;
pub use mock::MockAnchorContract;
#[cfg(feature = "ledger")]
pub use rpc::RpcAnchorContract;
pub use testnet::LedgerTestStore;

use async_trait::async_trait;
use notary_core::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AnchorError;

/// Most hashes the contract accepts in one `recordAnchorBatch` call
pub const MAX_CONTRACT_BATCH: usize = 100;

/// Default environment variable holding the signing key
pub const DEFAULT_KEY_ENV: &str = "NOTARY_LEDGER_PRIVATE_KEY";

/// Test networks a [`LedgerTestStore`] may use
pub const TESTNET_CHAINS: &[(u64, &str)] = &[
    (11_155_111, "sepolia"),
    (80_002, "polygon-amoy"),
    (84_532, "base-sepolia"),
    (421_614, "arbitrum-sepolia"),
    (31_337, "local"),
];

/// Production networks a [`LedgerMainStore`] may use
pub const MAINNET_CHAINS: &[(u64, &str)] = &[
    (1, "ethereum"),
    (10, "optimism"),
    (137, "polygon"),
    (8_453, "base"),
    (42_161, "arbitrum-one"),
];

/// Which whitelist a ledger store checks its chain against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerNetwork {
    Testnet,
    Mainnet,
}

impl LedgerNetwork {
    pub fn chains(&self) -> &'static [(u64, &'static str)] {
        match self {
            Self::Testnet => TESTNET_CHAINS,
            Self::Mainnet => MAINNET_CHAINS,
        }
    }

    pub fn chain_name(&self, chain_id: u64) -> Option<&'static str> {
        self.chains()
            .iter()
            .find(|(id, _)| *id == chain_id)
            .map(|(_, name)| *name)
    }

    /// Fail with a configuration error unless `chain_id` is whitelisted
    pub fn check_chain(&self, chain_id: u64) -> Result<&'static str, AnchorError> {
        self.chain_name(chain_id).ok_or_else(|| {
            AnchorError::Configuration(format!(
                "chain {} is not a supported {} chain; expected one of: {}",
                chain_id,
                self,
                self.chains()
                    .iter()
                    .map(|(id, name)| format!("{} ({})", id, name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

impl fmt::Display for LedgerNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        })
    }
}

/// Connection settings for a ledger store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    /// Name of the environment variable holding the hex signing key
    pub private_key_env: String,
    /// Use the reverting `recordAnchorStrict` call for single submissions
    pub strict: bool,
    /// Percentage applied to `eth_estimateGas` (120 = +20%)
    pub gas_limit_multiplier_percent: u64,
    pub request_timeout_secs: u64,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

impl LedgerConfig {
    /// Sepolia defaults; RPC URL and contract address still have to be set
    pub fn testnet() -> Self {
        Self {
            chain_id: 11_155_111,
            rpc_url: None,
            contract_address: None,
            private_key_env: DEFAULT_KEY_ENV.to_string(),
            strict: false,
            gas_limit_multiplier_percent: 120,
            request_timeout_secs: 30,
            receipt_poll_attempts: 30,
            receipt_poll_interval_ms: 2_000,
        }
    }

    /// Ethereum mainnet defaults
    pub fn mainnet() -> Self {
        Self {
            chain_id: 1,
            receipt_poll_attempts: 60,
            ..Self::testnet()
        }
    }

    pub fn with_endpoint(
        mut self,
        rpc_url: impl Into<String>,
        contract_address: impl Into<String>,
    ) -> Self {
        self.rpc_url = Some(rpc_url.into());
        self.contract_address = Some(contract_address.into());
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn rpc_url(&self) -> Result<&str, AnchorError> {
        self.rpc_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AnchorError::Configuration("ledger rpc_url is required".to_string()))
    }

    pub fn contract_address(&self) -> Result<&str, AnchorError> {
        self.contract_address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                AnchorError::Configuration("ledger contract_address is required".to_string())
            })
    }

    /// Read the signing key from the configured environment variable
    pub fn signing_key(&self) -> Option<String> {
        std::env::var(&self.private_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Registry entry as returned by `verifyAnchor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainAnchor {
    pub exists: bool,
    /// Block timestamp, seconds since the epoch
    pub timestamp: u64,
    pub anchor_type: String,
    pub recorder: String,
}

/// A mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Where a broadcast transaction stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Mined(TxOutcome),
    /// Known to the node but not in a block yet
    Pending,
    /// Neither mined nor in the node's pool; it was dropped or replaced
    Unknown,
}

/// Result of the non-reverting single record call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(TxOutcome),
    /// The contract reported the hash as already present; no transaction was sent
    AlreadyRecorded,
}

/// Result of a batch record call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub tx: TxOutcome,
    /// Entries the contract reported as newly recorded
    pub recorded: u64,
}

/// The registry contract surface the ledger stores call
#[async_trait]
pub trait AnchorContract: Send + Sync {
    /// Non-reverting single record
    async fn record_anchor(&self, hash: &Hash, anchor_type: &str)
        -> Result<RecordOutcome, AnchorError>;

    /// Reverting single record; duplicates surface as [`AnchorError::Reverted`]
    async fn record_anchor_strict(
        &self,
        hash: &Hash,
        anchor_type: &str,
    ) -> Result<TxOutcome, AnchorError>;

    /// One transaction for up to [`MAX_CONTRACT_BATCH`] hashes
    async fn record_batch(
        &self,
        hashes: &[Hash],
        anchor_types: &[String],
    ) -> Result<BatchOutcome, AnchorError>;

    async fn verify(&self, hash: &Hash) -> Result<OnChainAnchor, AnchorError>;

    async fn exists(&self, hash: &Hash) -> Result<bool, AnchorError>;

    /// Whether the hash was already recorded as of `block`
    async fn exists_at(&self, hash: &Hash, block: u64) -> Result<bool, AnchorError>;

    /// Look up a transaction broadcast earlier
    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, AnchorError>;

    async fn total_anchors(&self) -> Result<u64, AnchorError>;

    /// Native balance of the signing account, in wei
    async fn balance(&self) -> Result<u128, AnchorError>;

    fn contract_address(&self) -> String;

    /// Address of the signing account; `None` for read-only clients
    fn signer_address(&self) -> Option<String>;

    async fn is_connected(&self) -> bool;
}
