//! # Notary Anchor
//!
//! Storage backends for proof-of-existence anchors.
//!
//! ## Backends
//!
//! - **MemoryStore** (`in_memory`): volatile map, for tests and development
//! - **FileStore** (`private`): durable JSON document, rewritten atomically
//! - **LedgerTestStore** (`public_testnet`): registry contract on a test network
//! - **LedgerMainStore** (`public_mainnet`): registry contract on a production network
//!
//! All of them implement [`AnchorBackend`]. Runtime calls never fail with
//! `Err`; a submission always comes back as a tagged [`SubmitResult`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notary_anchor::{create_backend, BackendConfig, BackendKind};
//! use notary_core::{Anchor, Hash};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = create_backend(&BackendConfig::new(BackendKind::Private))?;
//!
//!     let anchor = Anchor::new("audit", "log_1", Hash::digest(b"x").to_hex())?;
//!     let result = backend.submit_anchor(&anchor).await;
//!     println!("{:?}: {}", result.status, result.anchor_hash);
//!
//!     Ok(())
//! }
//! ```

mod backend;
mod error;
mod factory;
mod file;
pub mod ledger;
mod memory;

pub use backend::{
    AnchorBackend, BackendDetails, BackendKind, BackendStats, BatchSubmitResult, ListQuery,
    StoredAnchor, SubmitResult, SubmitStatus, VerifyResult,
};
pub use error::AnchorError;
pub use factory::{create_backend, BackendConfig};
pub use file::{FileStore, FileStoreConfig, ImportReport, STORE_VERSION};
pub use ledger::{
    AnchorContract, LedgerConfig, LedgerMainStore, LedgerNetwork, LedgerTestStore,
    MockAnchorContract,
};
pub use memory::MemoryStore;

#[cfg(feature = "ledger")]
pub use ledger::RpcAnchorContract;
