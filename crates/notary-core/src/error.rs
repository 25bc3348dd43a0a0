//! Validation errors for anchor construction

use thiserror::Error;

/// A malformed anchor field.
///
/// Raised at construction time only; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field (`anchor_type`, `data_hash`, ...)
    pub field: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
