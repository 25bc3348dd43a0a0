//! Error types for backend operations

use notary_core::ValidationError;
use thiserror::Error;

/// Errors that can occur while building or talking to a backend
///
/// Construction paths return these directly. Runtime submission paths fold
/// them into [`SubmitResult`](crate::SubmitResult) values instead.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// Backend is misconfigured (missing RPC URL, unsupported chain, no signing key...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed anchor or record
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Durable store is full
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Transport failure talking to a remote node
    #[error("Network error: {0}")]
    Network(String),

    /// JSON-RPC error object returned by the node
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Contract call or transaction reverted
    #[error("Contract reverted: {0}")]
    Reverted(String),

    /// Transaction was broadcast but no receipt arrived in time; it may still be mined
    #[error("Transaction {tx_hash} broadcast but not yet mined")]
    Pending { tx_hash: String },

    /// Transaction signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnchorError {
    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Rpc { .. } | Self::Pending { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AnchorError::Network("timeout".into()).is_retryable());
        assert!(AnchorError::Rpc {
            code: -32000,
            message: "insufficient funds".into()
        }
        .is_retryable());
        assert!(AnchorError::Pending {
            tx_hash: "0xabc".into()
        }
        .is_retryable());
        assert!(!AnchorError::Reverted("duplicate".into()).is_retryable());
        assert!(!AnchorError::Capacity("full".into()).is_retryable());
        assert!(!AnchorError::Configuration("no rpc".into()).is_retryable());
    }
}
