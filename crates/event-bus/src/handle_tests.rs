//! Tests for message handles.

use super::*;
use crate::error::TransportError;
use crate::message::{EnqueueRequest, QueueName};
use crate::providers::InMemoryTransport;
use std::time::Duration;

async fn receive_one(transport: &InMemoryTransport, body: &str) -> ReceivedMessage {
    let queue = QueueName::new("handles".to_string()).unwrap();
    transport
        .enqueue(
            &queue,
            &EnqueueRequest {
                body: body.to_string(),
                deduplication_id: None,
                message_group_id: None,
            },
        )
        .await
        .unwrap();

    transport
        .receive_up_to(&queue, 1, Duration::ZERO, Duration::from_secs(30))
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn test_accessors_expose_received_message() {
    let transport = InMemoryTransport::default();
    let received = receive_one(&transport, "payload").await;
    let expected_id = received.message_id.clone();

    let handle = MessageHandle::new(received, Arc::new(transport));

    assert_eq!(handle.raw_message(), "payload");
    assert_eq!(handle.message_id(), &expected_id);
    assert_eq!(handle.delivery_count(), 1);
    assert_eq!(handle.message_group_id(), None);
    assert_eq!(handle.receipt_handle().queue().as_str(), "handles");
}

#[tokio::test]
async fn test_complete_acknowledges_message() {
    let transport = InMemoryTransport::default();
    let received = receive_one(&transport, "ack me").await;
    let queue = received.receipt_handle.queue().clone();

    let handle = MessageHandle::new(received, Arc::new(transport.clone()));
    handle.complete().await.unwrap();

    assert_eq!(transport.acknowledged_count(), 1);
    assert_eq!(transport.in_flight_count(&queue), 0);
}

#[tokio::test]
async fn test_complete_failure_is_wrapped_with_queue_context() {
    let transport = InMemoryTransport::default();
    let received = receive_one(&transport, "fails").await;
    transport.fail_acknowledgements(1);

    let handle = MessageHandle::new(received, Arc::new(transport.clone()));
    let error = handle.complete().await.unwrap_err();

    match error {
        QueueError::Transport {
            queue,
            operation,
            source,
        } => {
            assert_eq!(queue, "handles");
            assert_eq!(operation, "complete");
            assert!(matches!(source, TransportError::Service { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_into_body_leaves_message_in_flight() {
    let transport = InMemoryTransport::default();
    let received = receive_one(&transport, "keep").await;
    let queue = received.receipt_handle.queue().clone();

    let handle = MessageHandle::new(received, Arc::new(transport.clone()));
    assert_eq!(handle.into_body(), "keep");

    assert_eq!(transport.acknowledged_count(), 0);
    assert_eq!(transport.in_flight_count(&queue), 1);
}

#[tokio::test]
async fn test_debug_omits_body() {
    let transport = InMemoryTransport::default();
    let received = receive_one(&transport, "secret body").await;

    let handle = MessageHandle::new(received, Arc::new(transport));
    let rendered = format!("{:?}", handle);

    assert!(rendered.contains("MessageHandle"));
    assert!(!rendered.contains("secret body"));
}
