//! # Notary Queue
//!
//! Batches anchors so a ledger backend pays one transaction for many of them.
//!
//! Features:
//! - FIFO queue with order-preserving requeue after a failed flush
//! - Bounded retries with a dead-letter list
//! - Size and interval flush triggers, optional auto-flush
//! - Background interval flusher with exponential backoff

pub mod config;
pub mod processor;

pub use config::{BackoffStrategy, BatchConfig};
pub use processor::{
    BatchProcessor, BatchStats, DeadLetter, EnqueueOutcome, FlushResult, FlushStatus,
    QueuedAnchor, QueuedSummary,
};
