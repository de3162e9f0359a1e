//! Provider types and configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Get maximum message body size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,         // 256KB
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }

    /// Get maximum number of entries in one batch submission
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::AwsSqs => 10,
            Self::InMemory => 100,
        }
    }

    /// Get maximum number of messages a single receive may return
    pub fn max_receive_count(&self) -> u32 {
        match self {
            Self::AwsSqs => 10,
            Self::InMemory => 100,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "AwsSqs"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Configuration for queue client initialization
///
/// Every field carries a default, so a partially specified file or an empty
/// environment still yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    /// Upper bound of messages requested per receive
    pub max_number_of_messages: u32,
    /// How long a received message stays hidden from other receivers
    pub visibility_timeout_seconds: u64,
    /// Long-poll wait used by subscriptions
    pub subscribe_wait_seconds: u64,
    /// Long-poll wait used by each round of a drain
    pub drain_wait_seconds: u64,
    /// Pause after a failed fetch before a subscription polls again
    pub error_backoff_millis: u64,
    pub rate_limit: RateLimitConfig,
    pub batch_retry: BatchRetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            max_number_of_messages: 10,
            visibility_timeout_seconds: 300,
            subscribe_wait_seconds: 10,
            drain_wait_seconds: 1,
            error_backoff_millis: 1000,
            rate_limit: RateLimitConfig::default(),
            batch_retry: BatchRetryConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn subscribe_wait(&self) -> Duration {
        Duration::from_secs(self.subscribe_wait_seconds)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_secs(self.drain_wait_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_millis)
    }

    /// Check the configuration for values no provider can honor
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_number_of_messages == 0 {
            return Err(invalid("max_number_of_messages must be at least 1"));
        }

        // SQS rejects visibility timeouts above 12 hours
        if self.visibility_timeout_seconds > 43_200 {
            return Err(invalid("visibility_timeout_seconds must not exceed 43200"));
        }

        if self.rate_limit.units == 0 {
            return Err(invalid("rate_limit.units must be at least 1"));
        }

        if self.rate_limit.window_millis == 0 {
            return Err(invalid("rate_limit.window_millis must be at least 1"));
        }

        if self.batch_retry.backoff_multiplier < 1.0 {
            return Err(invalid("batch_retry.backoff_multiplier must be >= 1.0"));
        }

        if self.batch_retry.initial_delay_millis > self.batch_retry.max_delay_millis {
            return Err(invalid(
                "batch_retry.initial_delay_millis must not exceed max_delay_millis",
            ));
        }

        self.provider.validate()
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}

/// Publish throttling: at most `units` messages per `window_millis`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub units: u32,
    pub window_millis: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            units: 300,
            window_millis: 1000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }
}

/// Retry behavior for entries refused during a batch publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRetryConfig {
    pub max_retries: u32,
    pub initial_delay_millis: u64,
    pub max_delay_millis: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for BatchRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay_millis: 100,
            max_delay_millis: 5000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AwsSqs(AwsSqsConfig),
    InMemory(InMemoryConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::AwsSqs(_) => ProviderType::AwsSqs,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Self::AwsSqs(aws) => aws.validate(),
            Self::InMemory(memory) => {
                if memory.max_queue_size == 0 {
                    return Err(invalid("in_memory.max_queue_size must be at least 1"));
                }
                Ok(())
            }
        }
    }
}

/// AWS SQS (or SQS-compatible broker) configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsSqsConfig {
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Override for SQS-compatible brokers such as ElasticMQ or LocalStack
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl AwsSqsConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "provider.region".to_string(),
            });
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(invalid(
                "access_key_id and secret_access_key must be configured together",
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(invalid("provider.endpoint must be an http(s) URL"));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for AwsSqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    /// Window in which FIFO deduplication ids suppress repeated publishes
    pub deduplication_window_seconds: u64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            deduplication_window_seconds: 300,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
