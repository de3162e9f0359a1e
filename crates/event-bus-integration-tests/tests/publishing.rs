//! Integration tests for publishing
//!
//! These tests verify:
//! - Batch retry convergence and exhaustion
//! - FIFO deduplication and group defaulting
//! - Rate limiting across clones of a client
//! - Surfacing of single publish failures

mod common;

use common::{fifo_client, queue, standard_client, FlakyTransport};
use event_bus::{
    InMemoryTransport, Message, QueueClient, QueueConfig, QueueError, RateLimitConfig,
    DEFAULT_MESSAGE_GROUP_ID, MAX_RETRY,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Entries refused fewer than MAX_RETRY times are all published eventually
#[tokio::test(start_paused = true)]
async fn test_batch_retry_converges() {
    // Arrange: two entries refused a few times each
    let (client, broker) = standard_client();
    broker.fail_batch_entry("b", "ServiceUnavailable", 2);
    broker.fail_batch_entry("d", "ThrottlingException", MAX_RETRY - 1);

    // Act
    let ids = client
        .publish_batch(vec!["a", "b", "c", "d", "e"])
        .await
        .unwrap();

    // Assert: every entry stored once, ids distinct
    assert_eq!(ids.len(), 5);
    let distinct: HashSet<_> = ids.iter().map(|id| id.as_str().to_string()).collect();
    assert_eq!(distinct.len(), 5);
    assert_eq!(broker.visible_count(client.queue()), 5);
    assert_eq!(broker.entry_attempts("a"), 1);
    assert_eq!(broker.entry_attempts("b"), 3);
    assert_eq!(broker.entry_attempts("d"), MAX_RETRY);
}

/// An entry that is always refused fails the call after MAX_RETRY + 1 attempts
#[tokio::test(start_paused = true)]
async fn test_batch_retry_exhaustion_is_reported() {
    let (client, broker) = standard_client();
    broker.fail_batch_entry("poison", "InternalError", u32::MAX);

    let result = client.publish_batch(vec!["ok", "poison"]).await;

    match result {
        Err(QueueError::BatchRetriesExhausted {
            attempts, failures, ..
        }) => {
            assert_eq!(attempts, MAX_RETRY + 1);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].code, "InternalError");
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    assert_eq!(broker.entry_attempts("poison"), MAX_RETRY + 1);
    assert_eq!(broker.entry_attempts("ok"), 1);
}

/// FIFO publishes get a generated deduplication id and the default group
#[tokio::test]
async fn test_fifo_defaults_applied() {
    let (client, broker) = fifo_client();

    client.publish("plain").await.unwrap();
    client
        .publish(Message::new("grouped").with_message_group_id("tenant-7"))
        .await
        .unwrap();

    let stored = broker.enqueued_requests(client.queue());
    assert_eq!(stored.len(), 2);
    assert_eq!(
        stored[0].message_group_id.as_deref(),
        Some(DEFAULT_MESSAGE_GROUP_ID)
    );
    assert!(stored[0].deduplication_id.is_some());
    assert_eq!(stored[1].message_group_id.as_deref(), Some("tenant-7"));
    assert_ne!(stored[0].deduplication_id, stored[1].deduplication_id);
}

#[tokio::test]
async fn test_standard_queue_gets_no_fifo_attributes() {
    let (client, broker) = standard_client();

    client.publish_batch(vec!["x", "y"]).await.unwrap();

    for request in broker.enqueued_requests(client.queue()) {
        assert!(request.deduplication_id.is_none());
        assert!(request.message_group_id.is_none());
    }
}

/// Republishing with the same deduplication id stores the message once
#[tokio::test]
async fn test_fifo_duplicate_is_suppressed() {
    let (client, broker) = fifo_client();
    let message = Message::new("order-1").with_deduplication_id("order-1");

    let first = client.publish(message.clone()).await.unwrap();
    let second = client.publish(message).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(broker.visible_count(client.queue()), 1);
}

/// Clones share one quota; publishes beyond it wait for the next window
#[tokio::test(start_paused = true)]
async fn test_rate_limit_holds_across_clones() {
    // Arrange: 3 messages per second
    let broker = InMemoryTransport::default();
    let config = QueueConfig {
        rate_limit: RateLimitConfig {
            units: 3,
            window_millis: 1000,
        },
        ..QueueConfig::default()
    };
    let client = QueueClient::new(Arc::new(broker.clone()), queue("events"), config);
    let other = client.clone();
    let start = Instant::now();

    // Act
    let mut finished = Vec::new();
    for i in 0..7 {
        let publisher = if i % 2 == 0 { &client } else { &other };
        publisher.publish(format!("m{}", i)).await.unwrap();
        finished.push(start.elapsed());
    }

    // Assert: at most 3 publishes per window
    for window in 0..3u64 {
        let lower = Duration::from_secs(window);
        let upper = Duration::from_secs(window + 1);
        let in_window = finished
            .iter()
            .filter(|t| **t >= lower && **t < upper)
            .count();
        assert!(in_window <= 3, "window {} saw {} publishes", window, in_window);
    }
    assert!(finished[3] >= Duration::from_secs(1));
    assert!(finished[6] >= Duration::from_secs(2));
    assert_eq!(broker.visible_count(client.queue()), 7);
}

/// A failed single publish is returned to the caller once, not retried
#[tokio::test]
async fn test_publish_failure_is_surfaced_without_retry() {
    let broker = InMemoryTransport::default();
    let transport = Arc::new(FlakyTransport::new(broker.clone(), 1));
    let client = QueueClient::new(transport.clone(), queue("events"), QueueConfig::default());

    let error = client.publish("first").await.unwrap_err();

    assert!(error.is_transient());
    assert!(error.to_string().contains("events"));
    assert_eq!(transport.enqueue_calls(), 1);
    assert_eq!(broker.visible_count(client.queue()), 0);

    client.publish("second").await.unwrap();
    assert_eq!(broker.visible_count(client.queue()), 1);
}
