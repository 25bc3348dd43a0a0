//! Backend selection from configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{AnchorBackend, BackendKind};
use crate::error::AnchorError;
use crate::file::{FileStore, FileStoreConfig};
use crate::ledger::{LedgerConfig, LedgerMainStore, LedgerTestStore};
use crate::memory::MemoryStore;

/// Which backend to build, plus one settings block per backend kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(rename = "backend")]
    pub kind: BackendKind,
    pub private: FileStoreConfig,
    pub public_testnet: LedgerConfig,
    pub public_mainnet: LedgerConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::InMemory,
            private: FileStoreConfig::default(),
            public_testnet: LedgerConfig::testnet(),
            public_mainnet: LedgerConfig::mainnet(),
        }
    }
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Build the backend named by `config.kind`
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn AnchorBackend>, AnchorError> {
    let backend: Arc<dyn AnchorBackend> = match config.kind {
        BackendKind::InMemory => Arc::new(MemoryStore::new()),
        BackendKind::Private => Arc::new(FileStore::new(&config.private)?),
        BackendKind::PublicTestnet => Arc::new(LedgerTestStore::new(&config.public_testnet)?),
        BackendKind::PublicMainnet => Arc::new(LedgerMainStore::new(&config.public_mainnet)?),
    };
    tracing::info!(backend = %config.kind, "Anchor backend created");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_in_memory() {
        let backend = create_backend(&BackendConfig::default()).unwrap();
        assert_eq!(backend.backend_type(), BackendKind::InMemory);
    }

    #[test]
    fn test_create_private() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BackendConfig::new(BackendKind::Private);
        config.private = FileStoreConfig::new(dir.path().join("anchors.json"));
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.backend_type(), BackendKind::Private);
    }

    #[test]
    fn test_private_respects_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BackendConfig::new(BackendKind::Private);
        config.private = FileStoreConfig::new("../outside.json").with_base_dir(dir.path());
        assert!(matches!(
            create_backend(&config),
            Err(AnchorError::Configuration(_))
        ));

        config.private = FileStoreConfig::new("anchors.json").with_base_dir(dir.path());
        assert!(create_backend(&config).is_ok());
        assert!(!dir.path().parent().unwrap().join("outside.json").exists());
    }

    #[test]
    fn test_ledger_without_endpoint_is_configuration_error() {
        for kind in [BackendKind::PublicTestnet, BackendKind::PublicMainnet] {
            let err = create_backend(&BackendConfig::new(kind)).err().unwrap();
            assert!(matches!(err, AnchorError::Configuration(_)), "{}", kind);
        }
    }

    #[test]
    fn test_config_from_json_names_bad_backend() {
        let config: BackendConfig = serde_json::from_str(r#"{"backend": "private"}"#).unwrap();
        assert_eq!(config.kind, BackendKind::Private);
        assert_eq!(config.public_mainnet.chain_id, 1);

        let err = serde_json::from_str::<BackendConfig>(r#"{"backend": "s3"}"#).unwrap_err();
        assert!(err.to_string().contains("s3"));
    }
}
