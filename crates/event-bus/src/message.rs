//! Message types for queue operations including core domain identifiers.

use crate::error::{BatchEntryFailure, ValidationError};
use crate::provider::ProviderType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Queue identity suffix that marks a FIFO queue
pub const FIFO_SUFFIX: &str = ".fifo";

/// Message group used for FIFO messages that do not name one
pub const DEFAULT_MESSAGE_GROUP_ID: &str = "Default";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Opaque queue identity: either a queue name or a full queue URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue identity with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 2048 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-2048 characters".to_string(),
            });
        }

        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "whitespace and control characters are not allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Whether the identity names a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }

    /// Whether the identity is a full queue URL rather than a bare name
    pub fn is_url(&self) -> bool {
        self.0.starts_with("https://") || self.0.starts_with("http://")
    }

    /// Get queue identity as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Broker-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be published through the queue system
///
/// The body is an opaque, already serialized payload. The FIFO fields are
/// ignored for standard queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            deduplication_id: None,
            message_group_id: None,
        }
    }

    /// Set the deduplication id used by FIFO queues
    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }

    /// Set the message group for ordered FIFO delivery
    pub fn with_message_group_id(mut self, group: impl Into<String>) -> Self {
        self.message_group_id = Some(group.into());
        self
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

/// A message decorated for a specific queue, ready to hand to a transport
///
/// For FIFO queues both ids are always present; for standard queues both
/// are always absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub body: String,
    pub deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

impl EnqueueRequest {
    /// Decorate a message for a FIFO or standard queue
    pub fn decorate(message: Message, fifo: bool) -> Self {
        if !fifo {
            return Self {
                body: message.body,
                deduplication_id: None,
                message_group_id: None,
            };
        }

        let deduplication_id = message
            .deduplication_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let message_group_id = message
            .message_group_id
            .unwrap_or_else(|| DEFAULT_MESSAGE_GROUP_ID.to_string());

        Self {
            body: message.body,
            deduplication_id: Some(deduplication_id),
            message_group_id: Some(message_group_id),
        }
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: String,
    pub receipt_handle: ReceiptHandle,
    pub message_group_id: Option<String>,
    pub delivery_count: u32,
    pub received_at: Timestamp,
}

/// Opaque token for acknowledging a received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    queue: QueueName,
    expires_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(
        handle: String,
        queue: QueueName,
        expires_at: Timestamp,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            handle,
            queue,
            expires_at,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Queue the message was received from
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Check if the visibility window of the message has lapsed
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    /// Get time until the message becomes visible to other receivers again
    pub fn time_until_expiry(&self) -> Duration {
        let now = Timestamp::now();
        if now >= self.expires_at {
            Duration::zero()
        } else {
            self.expires_at.as_datetime() - now.as_datetime()
        }
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Batch Results
// ============================================================================

/// An entry the broker refused, kept with its request so it can be resent
#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub request: EnqueueRequest,
    pub failure: BatchEntryFailure,
}

/// Partition of a batch submission into accepted ids and refused entries
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<MessageId>,
    pub failed: Vec<FailedEntry>,
}

impl BatchOutcome {
    /// Whether every entry of the batch was accepted
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
