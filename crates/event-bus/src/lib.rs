//! # Event Bus
//!
//! Provider-agnostic queue client with at-least-once delivery, backed by AWS
//! SQS (or an SQS-compatible broker) or an in-process broker.
//!
//! This library provides:
//! - Publish and batch publish with bounded retry of refused entries
//! - Publish rate limiting shared by every clone of a client
//! - FIFO queue support: deduplication ids and message groups
//! - Pull, drain and background subscriptions with explicit acknowledgement
//!
//! ## Module Organization
//!
//! - [client] - [`QueueClient`] and [`QueueClientFactory`]
//! - [subscriber] - Background subscriptions and message handlers
//! - [handle] - Received message handles
//! - [rate_limiter] - Publish throttling
//! - [retry] - Batch retry policy
//! - [transport] - Transport adapter interface
//! - [providers] - In-memory and SQS transports
//! - [message] - Queue identity and message types
//! - [provider] - Provider types and configuration
//! - [error] - Error types for all queue operations
//!
//! ## Example
//!
//! ```rust
//! use event_bus::{handler_fn, QueueClientFactory, QueueName};
//!
//! # async fn example() -> Result<(), event_bus::QueueError> {
//! let queue = QueueName::new("orders.fifo".to_string())?;
//! let (client, _broker) = QueueClientFactory::create_test_client(queue);
//!
//! client.publish(r#"{"order":1}"#).await?;
//!
//! let handler = handler_fn("orders", |body: String| async move {
//!     println!("processing {}", body);
//!     Ok::<_, anyhow::Error>(())
//! });
//! let handled = client.pull_all(&handler).await?;
//! assert_eq!(handled, 1);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod handle;
pub mod message;
pub mod provider;
pub mod providers;
pub mod rate_limiter;
pub mod retry;
pub mod subscriber;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory};
pub use error::{
    BatchEntryFailure, ConfigurationError, QueueError, TransportError, ValidationError,
};
pub use handle::MessageHandle;
pub use message::{
    BatchOutcome, EnqueueRequest, FailedEntry, Message, MessageId, QueueName, ReceiptHandle,
    ReceivedMessage, Timestamp, DEFAULT_MESSAGE_GROUP_ID, FIFO_SUFFIX,
};
pub use provider::{
    AwsSqsConfig, BatchRetryConfig, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig,
    RateLimitConfig,
};
pub use providers::{InMemoryTransport, SqsTransport};
pub use rate_limiter::RateLimiter;
pub use retry::{BatchRetryPolicy, MAX_RETRY};
pub use subscriber::{
    handler_fn, FnHandler, MessageHandler, Subscriber, SubscriptionExit, SubscriptionHandle,
    SubscriptionStatus,
};
pub use transport::QueueTransport;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
