//! Core backend trait and the result types it returns

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notary_core::{time, Anchor, AnchorRecord, Metadata, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AnchorError;

/// The closed set of storage strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Volatile in-process map
    #[default]
    InMemory,
    /// Durable local JSON file
    Private,
    /// Ledger contract on a test network
    PublicTestnet,
    /// Ledger contract on a production network
    PublicMainnet,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::InMemory,
        BackendKind::Private,
        BackendKind::PublicTestnet,
        BackendKind::PublicMainnet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Private => "private",
            Self::PublicTestnet => "public_testnet",
            Self::PublicMainnet => "public_mainnet",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| {
                AnchorError::Configuration(format!(
                    "unknown backend '{}'; expected one of: {}",
                    s,
                    Self::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

impl Serialize for BackendKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackendKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome tag of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// Newly stored or recorded
    Submitted,
    /// Already present; nothing written
    Exists,
    /// Failed; see `message` and `retryable`
    Error,
    /// Accepted into the batch queue, not yet stored
    Queued,
    /// Anchoring is switched off
    Disabled,
}

/// Result of submitting one anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub status: SubmitStatus,
    pub anchor_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set on errors that a later retry can clear (transport, RPC)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(
        default,
        with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub stored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl SubmitResult {
    fn with_status(status: SubmitStatus, anchor_hash: impl Into<String>) -> Self {
        Self {
            status,
            anchor_hash: anchor_hash.into(),
            backend: None,
            message: None,
            retryable: false,
            tx_hash: None,
            stored_at: None,
            queue_position: None,
        }
    }

    pub fn submitted(anchor_hash: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            backend: Some(backend),
            ..Self::with_status(SubmitStatus::Submitted, anchor_hash)
        }
    }

    pub fn exists(anchor_hash: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            backend: Some(backend),
            message: Some("anchor already recorded".to_string()),
            ..Self::with_status(SubmitStatus::Exists, anchor_hash)
        }
    }

    pub fn error(
        anchor_hash: impl Into<String>,
        backend: BackendKind,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            backend: Some(backend),
            message: Some(message.into()),
            retryable,
            ..Self::with_status(SubmitStatus::Error, anchor_hash)
        }
    }

    /// Error result derived from an [`AnchorError`], keeping its retry class
    pub fn from_error(anchor_hash: impl Into<String>, backend: BackendKind, err: &AnchorError) -> Self {
        Self::error(anchor_hash, backend, err.to_string(), err.is_retryable())
    }

    pub fn queued(anchor_hash: impl Into<String>, position: usize) -> Self {
        Self {
            queue_position: Some(position),
            ..Self::with_status(SubmitStatus::Queued, anchor_hash)
        }
    }

    pub fn disabled(anchor_hash: impl Into<String>) -> Self {
        Self {
            message: Some("anchoring is disabled".to_string()),
            ..Self::with_status(SubmitStatus::Disabled, anchor_hash)
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_stored_at(mut self, stored_at: DateTime<Utc>) -> Self {
        self.stored_at = Some(stored_at);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == SubmitStatus::Error
    }
}

/// Aggregated result of a batch submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSubmitResult {
    /// One result per input anchor, in input order
    pub results: Vec<SubmitResult>,
    pub submitted: usize,
    pub exists: usize,
    pub errors: usize,
    /// Ledger transactions issued for this batch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tx_hashes: Vec<String>,
}

impl BatchSubmitResult {
    pub fn from_results(results: Vec<SubmitResult>) -> Self {
        let count = |s: SubmitStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            submitted: count(SubmitStatus::Submitted),
            exists: count(SubmitStatus::Exists),
            errors: count(SubmitStatus::Error),
            results,
            tx_hashes: Vec::new(),
        }
    }

    pub fn with_tx_hashes(mut self, tx_hashes: Vec<String>) -> Self {
        self.tx_hashes = tx_hashes;
        self
    }

    /// True when every anchor in a non-empty batch failed
    pub fn is_total_failure(&self) -> bool {
        !self.results.is_empty() && self.errors == self.results.len()
    }
}

/// Result of an existence lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub exists: bool,
    pub anchor_hash: String,
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(
        default,
        with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorder: Option<String>,
    /// Set when the lookup itself failed (for example, the node was unreachable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerifyResult {
    pub fn missing(anchor_hash: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            exists: false,
            anchor_hash: anchor_hash.into(),
            backend,
            anchor_type: None,
            source_id: None,
            timestamp: None,
            recorder: None,
            message: None,
        }
    }

    pub fn found(record: &StoredAnchor, backend: BackendKind) -> Self {
        Self {
            exists: true,
            anchor_hash: record.anchor_hash.clone(),
            backend,
            anchor_type: Some(record.anchor_type.clone()),
            source_id: record.source_id.clone(),
            timestamp: Some(record.timestamp),
            recorder: record.recorder.clone(),
            message: None,
        }
    }
}

/// An anchor as held by a backend
///
/// Local stores always fill `source_id` and `data_hash`. A ledger contract
/// only records hash, type, time and recorder, so ledger reads leave the
/// other fields empty unless this process submitted the anchor itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnchor {
    pub anchor_hash: String,
    pub anchor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "time::canonical")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_anchor_ref: Option<String>,
    #[serde(with = "time::canonical")]
    pub stored_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl StoredAnchor {
    pub fn from_anchor(anchor: &Anchor, stored_at: DateTime<Utc>) -> Self {
        Self {
            anchor_hash: anchor.anchor_hash().to_hex(),
            anchor_type: anchor.anchor_type().to_string(),
            source_id: Some(anchor.source_id().to_string()),
            data_hash: Some(anchor.data_hash().to_hex()),
            participants: anchor.participants().to_vec(),
            metadata: anchor.metadata().clone(),
            timestamp: *anchor.timestamp(),
            previous_anchor_ref: anchor.previous_anchor_ref().map(|h| h.to_hex()),
            stored_at,
            recorder: None,
            tx_hash: None,
        }
    }

    /// Rebuild the anchor, checking the stored hash against the fields
    pub fn to_anchor(&self) -> Result<Anchor, ValidationError> {
        let missing = |field: &'static str| {
            ValidationError::new(field, "not present in this record (ledger-only entry)")
        };
        let record = AnchorRecord {
            anchor_hash: Some(self.anchor_hash.clone()),
            anchor_type: self.anchor_type.clone(),
            source_id: self.source_id.clone().ok_or_else(|| missing("source_id"))?,
            data_hash: self.data_hash.clone().ok_or_else(|| missing("data_hash"))?,
            participants: self.participants.clone(),
            metadata: self.metadata.clone(),
            timestamp: Some(time::format_timestamp(&self.timestamp)),
            previous_anchor_ref: self.previous_anchor_ref.clone(),
        };
        Anchor::from_record(&record)
    }
}

/// Filters for [`AnchorBackend::list_anchors`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: usize,
    /// Exact-match type filter
    pub anchor_type: Option<String>,
    /// Inclusive lower bound on the anchor timestamp
    pub since: Option<DateTime<Utc>>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            anchor_type: None,
            since: None,
        }
    }
}

impl ListQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, anchor_type: impl Into<String>) -> Self {
        self.anchor_type = Some(anchor_type.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Parse an ISO-8601 lower bound
    pub fn since_str(self, since: &str) -> Result<Self, ValidationError> {
        Ok(self.since(time::parse_timestamp(since)?))
    }

    pub fn matches(&self, record: &StoredAnchor) -> bool {
        self.anchor_type
            .as_deref()
            .map_or(true, |t| record.anchor_type == t)
            && self.since.map_or(true, |since| record.timestamp >= since)
    }

    /// Sort newest-first and cap at `limit`.
    ///
    /// Input order breaks timestamp ties, so callers pass records in a
    /// stable order of their own.
    pub fn finish(&self, mut records: Vec<StoredAnchor>) -> Vec<StoredAnchor> {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(self.limit);
        records
    }
}

/// Backend-specific details carried by [`BackendStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendDetails {
    Volatile,
    DurableLocal {
        path: String,
        max_anchors: usize,
        file_size_bytes: Option<u64>,
    },
    Ledger {
        network: String,
        chain_id: u64,
        contract_address: String,
        signer: Option<String>,
        strict: bool,
        /// Anchors this process recorded
        submitted_count: u64,
        /// Transactions this process sent
        transaction_count: u64,
        balance_wei: Option<String>,
    },
}

/// Operational counters of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub backend_type: BackendKind,
    pub ready: bool,
    pub total_anchors: Option<u64>,
    pub anchors_by_type: BTreeMap<String, u64>,
    pub details: BackendDetails,
}

/// Count records per anchor type
pub(crate) fn count_by_type<'a>(
    records: impl IntoIterator<Item = &'a StoredAnchor>,
) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.anchor_type.clone()).or_insert(0) += 1;
    }
    counts
}

/// Trait for anchor storage backends
///
/// Implementations must:
/// - Treat duplicate submissions as `exists`, never as an error
/// - Report absence from lookups as a normal outcome
/// - Hand out detached copies of stored records
/// - Never panic or return `Err` from runtime calls; failures are tagged results
#[async_trait]
pub trait AnchorBackend: Send + Sync {
    /// Store one anchor
    async fn submit_anchor(&self, anchor: &Anchor) -> SubmitResult;

    /// Store several anchors; results come back in input order.
    ///
    /// The default submits one by one. Backends with a per-call cost override it.
    async fn submit_anchors(&self, anchors: &[Anchor]) -> BatchSubmitResult {
        let mut results = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            results.push(self.submit_anchor(anchor).await);
        }
        BatchSubmitResult::from_results(results)
    }

    /// Existence lookup by anchor hash (with or without `0x`)
    async fn verify_anchor(&self, anchor_hash: &str) -> VerifyResult;

    /// Full stored record, if present
    async fn get_anchor(&self, anchor_hash: &str) -> Option<StoredAnchor>;

    /// Newest-first listing with optional filters
    async fn list_anchors(&self, query: &ListQuery) -> Vec<StoredAnchor>;

    fn backend_type(&self) -> BackendKind;

    /// Liveness check
    async fn is_ready(&self) -> bool;

    async fn stats(&self) -> BackendStats;
}

/// Serde adapter for optional canonical timestamps
mod optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&notary_core::time::format_timestamp(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| notary_core::time::parse_timestamp(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
