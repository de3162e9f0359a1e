//! Common test utilities for event-bus integration tests
//!
//! This module provides:
//! - Client builders over the in-memory broker
//! - A recording message handler with configurable failures
//! - A transport wrapper that fails whole calls
//! - Polling helpers for asynchronous assertions

use async_trait::async_trait;
use event_bus::{
    BatchOutcome, EnqueueRequest, InMemoryTransport, MessageHandler, MessageId, ProviderType,
    QueueClient, QueueClientFactory, QueueName, QueueTransport, ReceiptHandle, ReceivedMessage,
    TransportError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Clients
// ============================================================================

/// Client for a standard queue over a fresh in-memory broker
#[allow(dead_code)]
pub fn standard_client() -> (QueueClient, InMemoryTransport) {
    QueueClientFactory::create_test_client(queue("events"))
}

/// Client for a FIFO queue over a fresh in-memory broker
#[allow(dead_code)]
pub fn fifo_client() -> (QueueClient, InMemoryTransport) {
    QueueClientFactory::create_test_client(queue("events.fifo"))
}

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

// ============================================================================
// Recording Handler
// ============================================================================

/// Handler remembering every body it receives, failing the listed ones
#[allow(dead_code)]
pub struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    failing: Vec<String>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Self::failing_on(&[])
    }

    pub fn failing_on(bodies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            failing: bodies.iter().map(|b| b.to_string()).collect(),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(body.to_string());
        if self.failing.iter().any(|f| f == body) {
            anyhow::bail!("refusing {}", body);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording-handler"
    }
}

// ============================================================================
// Failing Transport
// ============================================================================

/// Transport delegating to an in-memory broker after failing a number of
/// single enqueue calls with a connection error
#[allow(dead_code)]
pub struct FlakyTransport {
    inner: InMemoryTransport,
    enqueue_failures: AtomicU32,
    enqueue_calls: AtomicU32,
}

#[allow(dead_code)]
impl FlakyTransport {
    pub fn new(inner: InMemoryTransport, enqueue_failures: u32) -> Self {
        Self {
            inner,
            enqueue_failures: AtomicU32::new(enqueue_failures),
            enqueue_calls: AtomicU32::new(0),
        }
    }

    pub fn enqueue_calls(&self) -> u32 {
        self.enqueue_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueTransport for FlakyTransport {
    async fn enqueue(
        &self,
        queue: &QueueName,
        request: &EnqueueRequest,
    ) -> Result<MessageId, TransportError> {
        self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.enqueue_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.enqueue_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed {
                message: "connection reset by peer".to_string(),
            });
        }
        self.inner.enqueue(queue, request).await
    }

    async fn enqueue_batch(
        &self,
        queue: &QueueName,
        requests: &[EnqueueRequest],
    ) -> Result<BatchOutcome, TransportError> {
        self.inner.enqueue_batch(queue, requests).await
    }

    async fn receive_up_to(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        self.inner
            .receive_up_to(queue, max_messages, wait, visibility_timeout)
            .await
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        self.inner.acknowledge(receipt).await
    }

    async fn purge(&self, queue: &QueueName) -> Result<(), TransportError> {
        self.inner.purge(queue).await
    }

    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `condition` every 10ms (virtual time under a paused clock)
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
