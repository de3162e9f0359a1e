//! Queue client: the provider-agnostic façade over a transport.
//!
//! [`QueueClient`] owns every cross-cutting policy (publish rate limiting,
//! FIFO decoration, batch retry) and delegates the broker calls to a
//! [`QueueTransport`]. Clones share the transport and the rate limiter.

use crate::error::{ConfigurationError, QueueError};
use crate::handle::MessageHandle;
use crate::message::{EnqueueRequest, FailedEntry, Message, MessageId, QueueName};
use crate::provider::{ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{InMemoryTransport, SqsTransport};
use crate::rate_limiter::RateLimiter;
use crate::retry::BatchRetryPolicy;
use crate::subscriber::{handler_failure, MessageHandler, SubscriptionHandle, Subscriber};
use crate::transport::QueueTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Client bound to one queue
///
/// Cheap to clone. Every clone publishes through the same [`RateLimiter`],
/// so the quota holds across all of them.
#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn QueueTransport>,
    limiter: Arc<RateLimiter>,
    queue: QueueName,
    is_fifo: bool,
    config: Arc<QueueConfig>,
    retry_policy: BatchRetryPolicy,
}

impl QueueClient {
    /// Create a client for `queue` on top of an existing transport
    pub fn new(transport: Arc<dyn QueueTransport>, queue: QueueName, config: QueueConfig) -> Self {
        let is_fifo = queue.is_fifo();
        Self {
            transport,
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            queue,
            is_fifo,
            retry_policy: BatchRetryPolicy::from(&config.batch_retry),
            config: Arc::new(config),
        }
    }

    /// Replace the batch retry policy derived from configuration
    pub fn with_retry_policy(mut self, policy: BatchRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Share a rate limiter with other clients
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish one message
    ///
    /// Waits for one unit of the rate limiter. Failures are returned with the
    /// queue identity attached and are not retried.
    pub async fn publish(&self, message: impl Into<Message>) -> Result<MessageId, QueueError> {
        let request = EnqueueRequest::decorate(message.into(), self.is_fifo);
        self.limiter.add(1).await;

        let message_id = self
            .transport
            .enqueue(&self.queue, &request)
            .await
            .map_err(|e| QueueError::transport(self.queue.as_str(), "publish", e))?;

        debug!(
            queue = %self.queue,
            message_id = %message_id,
            message_group_id = ?request.message_group_id,
            "Message published"
        );
        Ok(message_id)
    }

    /// Publish many messages, resubmitting entries the broker refuses
    ///
    /// Messages are decorated once, so a resubmitted FIFO entry keeps its
    /// deduplication id. Refused entries are retried up to the policy's
    /// `max_retries` rounds; after that the call fails with
    /// [`QueueError::BatchRetriesExhausted`]. A failure of a whole batch
    /// request is returned immediately.
    pub async fn publish_batch<M>(&self, messages: Vec<M>) -> Result<Vec<MessageId>, QueueError>
    where
        M: Into<Message>,
    {
        let mut pending: Vec<EnqueueRequest> = messages
            .into_iter()
            .map(|m| EnqueueRequest::decorate(m.into(), self.is_fifo))
            .collect();

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let total = pending.len();
        self.limiter
            .add(u32::try_from(total).unwrap_or(u32::MAX))
            .await;

        let chunk_size = self.transport.max_batch_size().max(1);
        let mut message_ids = Vec::with_capacity(total);
        let mut retries_used = 0;

        loop {
            let mut failed: Vec<FailedEntry> = Vec::new();
            for chunk in pending.chunks(chunk_size) {
                let outcome = self
                    .transport
                    .enqueue_batch(&self.queue, chunk)
                    .await
                    .map_err(|e| QueueError::transport(self.queue.as_str(), "publish_batch", e))?;

                message_ids.extend(outcome.succeeded);
                failed.extend(outcome.failed);
            }

            if failed.is_empty() {
                debug!(
                    queue = %self.queue,
                    count = message_ids.len(),
                    retries = retries_used,
                    "Batch published"
                );
                return Ok(message_ids);
            }

            let codes = failed
                .iter()
                .map(|f| f.failure.code.as_str())
                .collect::<Vec<_>>()
                .join(", ");

            if !self.retry_policy.should_retry(retries_used) {
                error!(
                    queue = %self.queue,
                    failed_count = failed.len(),
                    attempts = retries_used + 1,
                    codes = %codes,
                    "Batch publish retries exhausted"
                );
                return Err(QueueError::BatchRetriesExhausted {
                    queue: self.queue.as_str().to_string(),
                    attempts: retries_used + 1,
                    failures: failed.into_iter().map(|f| f.failure).collect(),
                });
            }

            let delay = self.retry_policy.calculate_delay(retries_used);
            warn!(
                queue = %self.queue,
                failed_count = failed.len(),
                codes = %codes,
                retry = retries_used + 1,
                delay_ms = delay.as_millis() as u64,
                "Resubmitting refused batch entries"
            );

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            retries_used += 1;
            pending = failed.into_iter().map(|f| f.request).collect();

            // Resubmissions are broker traffic too
            self.limiter
                .add(u32::try_from(pending.len()).unwrap_or(u32::MAX))
                .await;
        }
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Receive at most one message, waiting up to `wait`
    pub async fn pull(&self, wait: Duration) -> Result<Option<MessageHandle>, QueueError> {
        Ok(self.pull_batch(wait, Some(1)).await?.into_iter().next())
    }

    /// Receive up to `max_count` messages, waiting up to `wait` for the first
    ///
    /// `max_count` defaults to `max_number_of_messages` and is clamped to what
    /// the transport can return in one call. An empty result means the queue
    /// had nothing visible for the whole wait.
    pub async fn pull_batch(
        &self,
        wait: Duration,
        max_count: Option<u32>,
    ) -> Result<Vec<MessageHandle>, QueueError> {
        let max_count = max_count
            .unwrap_or(self.config.max_number_of_messages)
            .clamp(1, self.transport.max_receive_count());

        let messages = self
            .transport
            .receive_up_to(
                &self.queue,
                max_count,
                wait,
                self.config.visibility_timeout(),
            )
            .await
            .map_err(|e| QueueError::transport(self.queue.as_str(), "pull", e))?;

        if !messages.is_empty() {
            debug!(queue = %self.queue, count = messages.len(), "Messages received");
        }

        Ok(messages
            .into_iter()
            .map(|m| MessageHandle::new(m, Arc::clone(&self.transport)))
            .collect())
    }

    /// Process messages until a receive comes back empty
    ///
    /// Each message is handed to `handler` and acknowledged once the handler
    /// succeeds. The first handler failure stops the drain; that message stays
    /// on the queue. Returns the number of messages handled.
    pub async fn pull_all(&self, handler: &dyn MessageHandler) -> Result<usize, QueueError> {
        let mut handled = 0;

        loop {
            let batch = self.pull_batch(self.config.drain_wait(), None).await?;
            if batch.is_empty() {
                info!(
                    queue = %self.queue,
                    handler = handler.name(),
                    handled,
                    "Queue drained"
                );
                return Ok(handled);
            }

            for handle in batch {
                if let Err(source) = handler.handle(handle.raw_message()).await {
                    return Err(handler_failure(handler, &handle, source));
                }
                handle.complete().await?;
                handled += 1;
            }
        }
    }

    /// Start a background subscription delivering messages to `handler`
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionHandle {
        Subscriber::new(self.clone(), handler).start()
    }

    /// Delete every message in the queue
    pub async fn purge(&self) -> Result<(), QueueError> {
        self.transport
            .purge(&self.queue)
            .await
            .map_err(|e| QueueError::transport(self.queue.as_str(), "purge", e))?;

        info!(queue = %self.queue, "Queue purged");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Whether the queue is FIFO, derived once from its name
    pub fn is_fifo(&self) -> bool {
        self.is_fifo
    }

    pub fn provider_type(&self) -> ProviderType {
        self.transport.provider_type()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &BatchRetryPolicy {
        &self.retry_policy
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.queue)
            .field("is_fifo", &self.is_fifo)
            .field("provider", &self.transport.provider_type())
            .finish()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory for creating queue clients with appropriate transports
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Build the transport selected by `config.provider`
    pub fn create_transport(config: &QueueConfig) -> Result<Arc<dyn QueueTransport>, QueueError> {
        match &config.provider {
            ProviderConfig::InMemory(memory) => {
                Ok(Arc::new(InMemoryTransport::new(memory.clone())))
            }
            ProviderConfig::AwsSqs(aws) => {
                let transport = SqsTransport::new(aws).map_err(|e| {
                    QueueError::ConfigurationError(ConfigurationError::Invalid {
                        message: e.to_string(),
                    })
                })?;
                Ok(Arc::new(transport))
            }
        }
    }

    /// Validate `config` and create a client for `queue`
    pub fn create_client(
        config: QueueConfig,
        queue: QueueName,
    ) -> Result<QueueClient, QueueError> {
        config.validate()?;
        let transport = Self::create_transport(&config)?;

        info!(
            queue = %queue,
            provider = %transport.provider_type(),
            fifo = queue.is_fifo(),
            "Queue client created"
        );
        Ok(QueueClient::new(transport, queue, config))
    }

    /// Create a client over a fresh in-memory broker, returning both
    pub fn create_test_client(queue: QueueName) -> (QueueClient, InMemoryTransport) {
        let transport = InMemoryTransport::default();
        let client = QueueClient::new(
            Arc::new(transport.clone()),
            queue,
            QueueConfig::default(),
        );
        (client, transport)
    }
}
