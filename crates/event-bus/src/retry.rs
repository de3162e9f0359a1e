//! # Batch Retry Policy
//!
//! Bounded retry with exponential backoff for batch entries the broker refused.
//!
//! Only the refused subset of a batch is resubmitted, so the policy counts
//! rounds rather than individual messages.

use crate::provider::BatchRetryConfig;
use rand::Rng;
use std::time::Duration;

/// Default number of resubmission rounds after the first batch attempt
pub const MAX_RETRY: u32 = 4;

/// Fraction of a delay that jitter may add or remove
const JITTER_FRACTION: f64 = 0.25;

/// How refused batch entries are resubmitted
///
/// # Examples
///
/// ```rust
/// use event_bus::retry::BatchRetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 4 retries, 100ms initial, 5s max, 2.0x multiplier
/// let policy = BatchRetryPolicy::default();
/// assert_eq!(policy.total_attempts(), 5);
///
/// // Resubmit immediately, useful in tests
/// let policy = BatchRetryPolicy::immediate(2);
/// assert_eq!(policy.calculate_delay(0), Duration::ZERO);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRetryPolicy {
    /// Resubmission rounds allowed after the first submission
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread each delay by up to 25% either way
    pub use_jitter: bool,
}

impl Default for BatchRetryPolicy {
    fn default() -> Self {
        Self::from(&BatchRetryConfig::default())
    }
}

impl From<&BatchRetryConfig> for BatchRetryPolicy {
    fn from(config: &BatchRetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_millis),
            max_delay: Duration::from_millis(config.max_delay_millis),
            backoff_multiplier: config.backoff_multiplier,
            use_jitter: config.use_jitter,
        }
    }
}

impl BatchRetryPolicy {
    /// Jittered exponential policy
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
        }
    }

    /// Policy that resubmits without waiting
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO, 1.0).without_jitter()
    }

    pub fn without_jitter(self) -> Self {
        Self {
            use_jitter: false,
            ..self
        }
    }

    /// Wait before resubmission round `retry` (0-based)
    ///
    /// `initial_delay * backoff_multiplier^retry`, capped at `max_delay`.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let uncapped = self.initial_delay.as_secs_f64() * factor;
        let delay = if uncapped.is_finite() {
            self.max_delay.min(Duration::from_secs_f64(uncapped.max(0.0)))
        } else {
            self.max_delay
        };

        if self.use_jitter && !delay.is_zero() {
            let spread = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
            delay.mul_f64(1.0 + spread)
        } else {
            delay
        }
    }

    /// Whether another resubmission round is allowed after `retries_used` rounds
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Total submissions of a failing entry before giving up (initial + retries)
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
