//! Batching configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant { secs: u64 },
    Exponential { initial_secs: u64, multiplier: f64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_secs: 1,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant { secs } => Duration::from_secs(*secs),
            Self::Exponential {
                initial_secs,
                multiplier,
            } => {
                let secs = (*initial_secs as f64 * multiplier.powi(attempt as i32)) as u64;
                Duration::from_secs(secs)
            }
        }
    }
}

/// Batch queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Flush once this many seconds have passed since the last successful flush
    pub interval_seconds: u64,
    /// Flush once the queue holds this many anchors
    pub max_batch_size: usize,
    /// Failed submissions before an anchor is dead-lettered; 0 retries forever
    pub max_attempts: u32,
    /// Flush from inside `enqueue` when a threshold is met
    pub auto_flush: bool,
    /// Wait between failed flushes in the interval flusher
    pub backoff: BackoffStrategy,
    pub max_backoff_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            max_batch_size: 50,
            max_attempts: 5,
            auto_flush: false,
            backoff: BackoffStrategy::default(),
            max_backoff_secs: 300,
        }
    }
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Delay before the next flush after `failures` consecutive failed flushes
    pub fn retry_delay(&self, failures: u32) -> Duration {
        self.backoff
            .delay(failures.saturating_sub(1))
            .min(Duration::from_secs(self.max_backoff_secs))
    }

    /// Whether an anchor that has failed `attempts` times is out of retries
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert!(config.enabled);
        assert!(!config.auto_flush);
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.max_batch_size, 50);
    }

    #[test]
    fn test_backoff_delays() {
        let exp = BackoffStrategy::default();
        assert_eq!(exp.delay(0), Duration::from_secs(1));
        assert_eq!(exp.delay(3), Duration::from_secs(8));
        assert_eq!(BackoffStrategy::Constant { secs: 5 }.delay(9), Duration::from_secs(5));

        let config = BatchConfig {
            max_backoff_secs: 10,
            ..BatchConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_secs(1));
        assert_eq!(config.retry_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_exhaustion() {
        let config = BatchConfig::default();
        assert!(!config.is_exhausted(4));
        assert!(config.is_exhausted(5));

        let unbounded = BatchConfig {
            max_attempts: 0,
            ..BatchConfig::default()
        };
        assert!(!unbounded.is_exhausted(1_000));
    }

    #[test]
    fn test_partial_json() {
        let config: BatchConfig = serde_json::from_str(r#"{"max_batch_size": 5}"#).unwrap();
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.max_attempts, 5);
    }
}
