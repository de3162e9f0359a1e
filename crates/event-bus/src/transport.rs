//! Transport adapter interface.
//!
//! A transport performs the actual broker calls. It owns no policy: rate
//! limiting, FIFO decoration and batch retry all live in
//! [`QueueClient`](crate::client::QueueClient), which makes every transport
//! interchangeable and lets tests drive the policy with the in-memory broker.

use crate::error::TransportError;
use crate::message::{
    BatchOutcome, EnqueueRequest, MessageId, QueueName, ReceiptHandle, ReceivedMessage,
};
use crate::provider::ProviderType;
use async_trait::async_trait;
use std::time::Duration;

/// Interface implemented by specific queue brokers (AWS SQS, in-memory, ...)
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue a single message
    async fn enqueue(
        &self,
        queue: &QueueName,
        request: &EnqueueRequest,
    ) -> Result<MessageId, TransportError>;

    /// Enqueue up to [`max_batch_size`](Self::max_batch_size) messages in one call
    ///
    /// Per-entry refusals are reported in the outcome; an `Err` means the
    /// whole call failed and nothing is known about individual entries.
    async fn enqueue_batch(
        &self,
        queue: &QueueName,
        requests: &[EnqueueRequest],
    ) -> Result<BatchOutcome, TransportError>;

    /// Long-poll for up to `max_messages`, waiting at most `wait` for the first one
    async fn receive_up_to(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Acknowledge (delete) a received message
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError>;

    /// Remove every message from the queue
    async fn purge(&self, queue: &QueueName) -> Result<(), TransportError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> usize {
        self.provider_type().max_batch_size()
    }

    /// Get maximum number of messages a receive may return
    fn max_receive_count(&self) -> u32 {
        self.provider_type().max_receive_count()
    }
}
