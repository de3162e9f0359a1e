//! Background subscriptions.
//!
//! A [`Subscriber`] runs a polling loop on its own tokio task: long-poll the
//! queue, hand each message to a [`MessageHandler`], acknowledge it when the
//! handler succeeds. The loop is stopped through a [`CancellationToken`] and
//! reports how it ended through the returned [`SubscriptionHandle`].
//!
//! Handler failures are treated differently per queue kind:
//! - standard queues log the failure and move on, leaving the message to be
//!   redelivered after its visibility timeout
//! - FIFO queues end the subscription, since processing later messages of the
//!   group would break ordering

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::handle::MessageHandle;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;

// ============================================================================
// Handlers
// ============================================================================

/// Processes message bodies delivered by a subscription or a drain
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message body; an error leaves the message unacknowledged
    async fn handle(&self, body: &str) -> anyhow::Result<()>;

    /// Name used in logs and errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler built from a closure by [`handler_fn`]
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Adapt an async closure taking the owned body into a [`MessageHandler`]
///
/// ```rust
/// use event_bus::subscriber::{handler_fn, MessageHandler};
///
/// let handler = handler_fn("printer", |body: String| async move {
///     println!("{}", body);
///     Ok::<_, anyhow::Error>(())
/// });
/// assert_eq!(handler.name(), "printer");
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        (self.f)(body.to_string()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the error reported when `handler` rejects the message behind `handle`
pub(crate) fn handler_failure(
    handler: &dyn MessageHandler,
    handle: &MessageHandle,
    source: anyhow::Error,
) -> QueueError {
    QueueError::Handler {
        handler: handler.name().to_string(),
        message_id: handle.message_id().to_string(),
        body: handle.raw_message().to_string(),
        source,
    }
}

// ============================================================================
// Subscription State
// ============================================================================

/// Observable state of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Running,
    Stopped,
    /// Ended by a handler failure on a FIFO queue or a panic
    Failed(String),
}

/// How a subscription task ended
#[derive(Debug)]
pub enum SubscriptionExit {
    /// Cancelled through its token
    Stopped,
    /// A handler failed on a FIFO queue
    Failed(QueueError),
    /// The task panicked
    Panicked(String),
}

impl SubscriptionExit {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Handle to a running subscription
///
/// Dropping the handle does not stop the subscription; call
/// [`stop`](Self::stop) or cancel the token.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    status: watch::Receiver<SubscriptionStatus>,
    task: JoinHandle<SubscriptionExit>,
}

impl SubscriptionHandle {
    /// Cancel the subscription and wait for its task to end
    pub async fn stop(self) -> SubscriptionExit {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the subscription task to end on its own
    pub async fn join(self) -> SubscriptionExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => SubscriptionExit::Panicked(join_failure_message(e)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token that stops the subscription when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest published status
    pub fn exit_status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified whenever the status changes
    pub fn status_changes(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("status", &*self.status.borrow())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Describe why a task ended without returning
fn join_failure_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }

    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Polling loop delivering messages of one queue to one handler
pub struct Subscriber {
    client: QueueClient,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn new(client: QueueClient, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            client,
            handler,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop this subscription together with `token`, e.g. an application-wide shutdown token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Spawn the polling loop and return immediately
    pub fn start(self) -> SubscriptionHandle {
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Running);
        let cancel = self.cancel.clone();
        let queue = self.client.queue().clone();

        let task = tokio::spawn(async move {
            // The loop runs on its own task so a panicking handler still ends
            // with a published status
            let exit = match tokio::spawn(self.keep_polling()).await {
                Ok(exit) => exit,
                Err(e) => {
                    let message = join_failure_message(e);
                    error!(queue = %queue, error = %message, "Subscription task panicked");
                    SubscriptionExit::Panicked(message)
                }
            };
            let status = match &exit {
                SubscriptionExit::Stopped => SubscriptionStatus::Stopped,
                SubscriptionExit::Failed(e) => SubscriptionStatus::Failed(e.to_string()),
                SubscriptionExit::Panicked(message) => SubscriptionStatus::Failed(message.clone()),
            };
            // Nobody may be watching any more
            let _ = status_tx.send(status);
            exit
        });

        SubscriptionHandle {
            cancel,
            status: status_rx,
            task,
        }
    }

    async fn keep_polling(self) -> SubscriptionExit {
        let queue = self.client.queue().clone();
        let config = self.client.config();
        let wait = config.subscribe_wait();
        let backoff = config.error_backoff();

        info!(
            queue = %queue,
            handler = self.handler.name(),
            fifo = self.client.is_fifo(),
            "Subscription started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.client.pull_batch(wait, None) => result,
            };

            let batch = match fetched {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        queue = %queue,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to fetch messages"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    continue;
                }
            };

            if let Err(e) = self.dispatch(batch).await {
                error!(
                    queue = %queue,
                    handler = self.handler.name(),
                    error = %e,
                    "Handler failed on FIFO queue; subscription terminated"
                );
                return SubscriptionExit::Failed(e);
            }
        }

        info!(queue = %queue, handler = self.handler.name(), "Subscription stopped");
        SubscriptionExit::Stopped
    }

    /// Deliver one received batch in order
    ///
    /// Returns an error only for a handler failure on a FIFO queue.
    async fn dispatch(&self, batch: Vec<MessageHandle>) -> Result<(), QueueError> {
        let fifo = self.client.is_fifo();
        let mut remaining = batch.len();

        for handle in batch {
            remaining -= 1;

            if let Err(source) = self.handler.handle(handle.raw_message()).await {
                let failure = handler_failure(self.handler.as_ref(), &handle, source);
                if fifo {
                    return Err(failure);
                }
                error!(error = %failure, "Handler failed; message left for redelivery");
                continue;
            }

            let message_id = handle.message_id().clone();
            match handle.complete().await {
                Ok(()) => debug!(message_id = %message_id, "Message handled"),
                Err(e) if fifo => {
                    warn!(
                        message_id = %message_id,
                        error = %e,
                        abandoned = remaining,
                        "Acknowledge failed; leaving rest of FIFO batch for redelivery"
                    );
                    return Ok(());
                }
                Err(e) => warn!(message_id = %message_id, error = %e, "Acknowledge failed"),
            }
        }

        Ok(())
    }
}
