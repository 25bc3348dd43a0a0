//! # Notary Client
//!
//! One entry point for anchoring: configuration, backend selection, batching.
//!
//! ```rust,no_run
//! use notary_client::{AnchorClient, NotaryConfig, SubmitMode};
//! use notary_core::{Anchor, Hash};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     notary_client::telemetry::init_tracing()?;
//!     let client = AnchorClient::new(NotaryConfig::from_env()?)?;
//!
//!     let anchor = Anchor::new("audit", "log_1", Hash::digest(b"x").to_hex())?;
//!     client.submit(anchor, SubmitMode::Batched).await;
//!
//!     let flushed = client.flush_batch().await;
//!     println!("flushed {} anchors", flushed.flushed_count);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;

pub use client::{AnchorClient, ClientStats, ClientStatus, SubmitMode};
pub use config::{ConfigError, NotaryConfig};
pub use error::ClientError;
