//! Retry configuration for watch/exec transactions

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for transaction retry behavior
///
/// A watch conflict restarts the transaction body from scratch. After
/// `max_retries` restarts the caller gets `Error::ContentionExceeded`.
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::new().with_max_retries(8).with_max_delay_ms(20);
/// run_in_transaction(&store, &keys, &retry, true, |txn| { ... })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after a conflict (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 64,
            base_delay_ms: 1,
            max_delay_ms: 50,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first conflict
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry conflicts forever
    pub fn unbounded() -> Self {
        Self {
            max_retries: usize::MAX,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.min(63) as u32;
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
