//! Configuration management for Notary
//!
//! Values come from serde (any format the caller parses) or from `NOTARY_*`
//! environment variables. They are only read when a client is built.

use notary_anchor::{BackendConfig, BackendKind, LedgerConfig};
use notary_queue::BatchConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidEnvVar {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Full Notary configuration
///
/// In serialized form the backend settings sit at the top level:
///
/// ```json
/// { "enabled": true, "backend": "private",
///   "private": { "path": "./data/anchors.json", "max_anchors": 100000 },
///   "batching": { "enabled": true, "interval_seconds": 60, "max_batch_size": 50 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotaryConfig {
    /// When false every submission returns `disabled` without touching storage
    pub enabled: bool,
    #[serde(flatten)]
    pub backend: BackendConfig,
    pub batching: BatchConfig,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendConfig::default(),
            batching: BatchConfig::default(),
        }
    }
}

impl NotaryConfig {
    pub fn with_backend(kind: BackendKind) -> Self {
        Self {
            backend: BackendConfig::new(kind),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - NOTARY_ENABLED, NOTARY_BACKEND
    /// - NOTARY_STORAGE_PATH, NOTARY_STORAGE_BASE_DIR, NOTARY_MAX_ANCHORS (private backend)
    /// - NOTARY_BATCH_ENABLED, NOTARY_BATCH_INTERVAL_SECS, NOTARY_BATCH_MAX_SIZE
    /// - NOTARY_LEDGER_CHAIN_ID, NOTARY_LEDGER_RPC_URL, NOTARY_LEDGER_CONTRACT,
    ///   NOTARY_LEDGER_KEY_ENV (applied to the mainnet block when the backend
    ///   is `public_mainnet`, to the testnet block otherwise)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = get("NOTARY_ENABLED") {
            config.enabled = parse_bool("NOTARY_ENABLED", &v)?;
        }
        if let Some(v) = get("NOTARY_BACKEND") {
            config.backend.kind = BackendKind::from_str(&v).map_err(|e| ConfigError::InvalidEnvVar {
                var: "NOTARY_BACKEND",
                value: v.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(v) = get("NOTARY_STORAGE_PATH") {
            config.backend.private.path = PathBuf::from(v);
        }
        if let Some(v) = get("NOTARY_STORAGE_BASE_DIR") {
            config.backend.private.base_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("NOTARY_MAX_ANCHORS") {
            config.backend.private.max_anchors = parse_num("NOTARY_MAX_ANCHORS", &v)?;
        }

        if let Some(v) = get("NOTARY_BATCH_ENABLED") {
            config.batching.enabled = parse_bool("NOTARY_BATCH_ENABLED", &v)?;
        }
        if let Some(v) = get("NOTARY_BATCH_INTERVAL_SECS") {
            config.batching.interval_seconds = parse_num("NOTARY_BATCH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("NOTARY_BATCH_MAX_SIZE") {
            config.batching.max_batch_size = parse_num("NOTARY_BATCH_MAX_SIZE", &v)?;
        }

        let ledger: &mut LedgerConfig = match config.backend.kind {
            BackendKind::PublicMainnet => &mut config.backend.public_mainnet,
            _ => &mut config.backend.public_testnet,
        };
        if let Some(v) = get("NOTARY_LEDGER_CHAIN_ID") {
            ledger.chain_id = parse_num("NOTARY_LEDGER_CHAIN_ID", &v)?;
        }
        if let Some(v) = get("NOTARY_LEDGER_RPC_URL") {
            ledger.rpc_url = Some(v);
        }
        if let Some(v) = get("NOTARY_LEDGER_CONTRACT") {
            ledger.contract_address = Some(v);
        }
        if let Some(v) = get("NOTARY_LEDGER_KEY_ENV") {
            ledger.private_key_env = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no backend or queue can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batching.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batching.max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.backend.private.max_anchors == 0 {
            return Err(ConfigError::Invalid(
                "private.max_anchors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_num<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = NotaryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend.kind, BackendKind::InMemory);
        assert!(!config.batching.auto_flush);
    }

    #[test]
    fn test_from_lookup() {
        let config = NotaryConfig::from_lookup(lookup(&[
            ("NOTARY_BACKEND", "private"),
            ("NOTARY_STORAGE_PATH", "anchors.json"),
            ("NOTARY_STORAGE_BASE_DIR", "/var/lib/notary"),
            ("NOTARY_MAX_ANCHORS", "10"),
            ("NOTARY_BATCH_MAX_SIZE", "5"),
            ("NOTARY_BATCH_ENABLED", "no"),
        ]))
        .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Private);
        assert_eq!(config.backend.private.max_anchors, 10);
        assert_eq!(
            config.backend.private.base_dir.as_deref(),
            Some(std::path::Path::new("/var/lib/notary"))
        );
        assert_eq!(config.batching.max_batch_size, 5);
        assert!(!config.batching.enabled);
    }

    #[test]
    fn test_ledger_vars_target_selected_network() {
        let config = NotaryConfig::from_lookup(lookup(&[
            ("NOTARY_BACKEND", "public_mainnet"),
            ("NOTARY_LEDGER_CHAIN_ID", "137"),
            ("NOTARY_LEDGER_RPC_URL", "https://polygon.example"),
        ]))
        .unwrap();
        assert_eq!(config.backend.public_mainnet.chain_id, 137);
        assert_eq!(config.backend.public_testnet.chain_id, 11_155_111);
        assert!(config.backend.public_testnet.rpc_url.is_none());
    }

    #[test]
    fn test_invalid_values_are_named() {
        let err = NotaryConfig::from_lookup(lookup(&[("NOTARY_BACKEND", "ipfs")])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NOTARY_BACKEND"));
        assert!(msg.contains("in_memory, private, public_testnet, public_mainnet"));

        let err = NotaryConfig::from_lookup(lookup(&[("NOTARY_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { var: "NOTARY_ENABLED", .. }));

        let err = NotaryConfig::from_lookup(lookup(&[("NOTARY_BATCH_MAX_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_json_layout() {
        let config: NotaryConfig = serde_json::from_str(
            r#"{"enabled": false, "backend": "private",
                "private": {"path": "anchors.json"},
                "batching": {"max_batch_size": 5}}"#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.backend.kind, BackendKind::Private);
        assert_eq!(config.backend.private.max_anchors, 100_000);
        assert_eq!(config.batching.max_batch_size, 5);
        assert_eq!(config.batching.interval_seconds, 60);
    }
}
