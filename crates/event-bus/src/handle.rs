//! Received message handles.

use crate::error::QueueError;
use crate::message::{MessageId, ReceiptHandle, ReceivedMessage};
use crate::transport::QueueTransport;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;

/// One received message together with the action that acknowledges it
///
/// The handle is owned by whoever received it. [`complete`](Self::complete)
/// consumes the handle, so a message can be acknowledged at most once.
/// Dropping a handle without completing it leaves the message on the broker,
/// where it becomes visible again once its visibility timeout lapses.
pub struct MessageHandle {
    message: ReceivedMessage,
    transport: Arc<dyn QueueTransport>,
}

impl MessageHandle {
    pub(crate) fn new(message: ReceivedMessage, transport: Arc<dyn QueueTransport>) -> Self {
        Self { message, transport }
    }

    /// Message body exactly as published
    pub fn raw_message(&self) -> &str {
        &self.message.body
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message.message_id
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.message.receipt_handle
    }

    pub fn message_group_id(&self) -> Option<&str> {
        self.message.message_group_id.as_deref()
    }

    /// Approximate number of times the broker has delivered this message
    pub fn delivery_count(&self) -> u32 {
        self.message.delivery_count
    }

    /// Acknowledge the message so the broker deletes it
    pub async fn complete(self) -> Result<(), QueueError> {
        let receipt = &self.message.receipt_handle;
        self.transport.acknowledge(receipt).await.map_err(|e| {
            QueueError::transport(receipt.queue().as_str(), "complete", e)
        })?;

        debug!(
            queue = %receipt.queue(),
            message_id = %self.message.message_id,
            "Message completed"
        );
        Ok(())
    }

    /// Give up the handle without acknowledging, keeping the body
    pub fn into_body(self) -> String {
        self.message.body
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandle")
            .field("message_id", &self.message.message_id)
            .field("queue", self.message.receipt_handle.queue())
            .field("delivery_count", &self.message.delivery_count)
            .finish()
    }
}
