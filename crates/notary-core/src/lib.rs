//! # Notary Core
//!
//! Core types for the Notary anchoring layer:
//! - [`Anchor`] — immutable proof-of-existence record with a canonical hash
//! - [`Hash`] — SHA-256 digest used for content and anchor hashes
//! - [`MetadataValue`] — closed JSON value union for anchor metadata
//!
//! ```rust
//! use notary_core::{Anchor, Hash};
//!
//! let content = Hash::digest(b"minutes of the 2025-01-15 board meeting");
//! let anchor = Anchor::builder("meeting", "board-2025-01", content.to_hex())
//!     .participants(["alice", "bob"])
//!     .metadata("room", "A")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(anchor.anchor_hash().to_hex().len(), 64);
//! ```

pub mod anchor;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod time;

pub use anchor::{Anchor, AnchorBuilder, AnchorRecord, AnchorType, CUSTOM_TYPE_PREFIX};
pub use error::ValidationError;
pub use hash::{normalize_hash_key, Hash};
pub use metadata::{Metadata, MetadataValue};
