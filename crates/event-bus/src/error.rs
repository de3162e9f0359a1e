//! Error types for queue operations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue client operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{operation} failed on queue '{queue}': {source}")]
    Transport {
        queue: String,
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error(
        "Batch publish to queue '{queue}' failed after {attempts} attempts: {}",
        format_failure_codes(.failures)
    )]
    BatchRetriesExhausted {
        queue: String,
        attempts: u32,
        failures: Vec<BatchEntryFailure>,
    },

    #[error("Handler '{handler}' failed on message {message_id} (body: {body}): {source}")]
    Handler {
        handler: String,
        message_id: String,
        body: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Wrap a transport error with the queue identity and the failing operation
    pub fn transport(
        queue: impl Into<String>,
        operation: &'static str,
        source: TransportError,
    ) -> Self {
        Self::Transport {
            queue: queue.into(),
            operation,
            source,
        }
    }

    /// Check if error is transient and the operation may succeed when repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_transient(),
            Self::BatchRetriesExhausted { .. } => false,
            Self::Handler { .. } => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

fn format_failure_codes(failures: &[BatchEntryFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One entry of a batch that the broker refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    /// Broker error code (e.g. `InternalError`, `InvalidParameterValue`)
    pub code: String,
    /// Human readable reason reported by the broker
    pub reason: String,
    /// Whether the broker blamed the request rather than itself
    pub sender_fault: bool,
}

impl fmt::Display for BatchEntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// Errors reported by a transport adapter
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Receipt handle is invalid or expired: {receipt}")]
    InvalidReceipt { receipt: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Request rejected: {message}")]
    InvalidRequest { message: String },

    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("Malformed response: {message}")]
    Serialization { message: String },

    #[error("Transport configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl TransportError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::InvalidReceipt { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::InvalidRequest { .. } => false,
            Self::Service { .. } => true,
            Self::Serialization { .. } => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(5)),
            Self::Service { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
