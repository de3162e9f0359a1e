//! Tests for the queue client.

use super::*;
use crate::error::TransportError;
use crate::message::DEFAULT_MESSAGE_GROUP_ID;
use crate::provider::{BatchRetryConfig, RateLimitConfig};
use crate::retry::MAX_RETRY;
use crate::subscriber::handler_fn;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

// ============================================================================
// Test Helper Functions
// ============================================================================

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

/// Client over a fresh broker that resubmits refused entries without waiting
fn client_for(name: &str) -> (QueueClient, InMemoryTransport) {
    let (client, broker) = QueueClientFactory::create_test_client(queue(name));
    (client.with_retry_policy(BatchRetryPolicy::immediate(4)), broker)
}

fn counting_handler(counter: Arc<AtomicUsize>) -> impl MessageHandler {
    handler_fn("counter", move |_body: String| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    })
}

// ============================================================================
// Publish
// ============================================================================

mod publish_tests {
    use super::*;

    #[tokio::test]
    async fn test_standard_publish_attaches_no_fifo_ids() {
        // Arrange
        let (client, broker) = client_for("orders");

        // Act
        let message = Message::new("a")
            .with_deduplication_id("ignored")
            .with_message_group_id("ignored");
        client.publish(message).await.unwrap();

        // Assert
        let sent = broker.enqueued_requests(client.queue());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].deduplication_id, None);
        assert_eq!(sent[0].message_group_id, None);
    }

    #[tokio::test]
    async fn test_fifo_publish_defaults_dedup_and_group() {
        let (client, broker) = client_for("orders.fifo");

        client.publish("a").await.unwrap();
        client.publish("b").await.unwrap();

        let sent = broker.enqueued_requests(client.queue());
        assert_eq!(sent.len(), 2);
        for request in &sent {
            assert_eq!(
                request.message_group_id.as_deref(),
                Some(DEFAULT_MESSAGE_GROUP_ID)
            );
            assert!(request
                .deduplication_id
                .as_deref()
                .is_some_and(|id| !id.is_empty()));
        }
        assert_ne!(sent[0].deduplication_id, sent[1].deduplication_id);
    }

    #[tokio::test]
    async fn test_fifo_publish_keeps_caller_ids() {
        let (client, broker) = client_for("orders.fifo");

        client
            .publish(
                Message::new("a")
                    .with_deduplication_id("order-1")
                    .with_message_group_id("customer-7"),
            )
            .await
            .unwrap();

        let sent = broker.enqueued_requests(client.queue());
        assert_eq!(sent[0].deduplication_id.as_deref(), Some("order-1"));
        assert_eq!(sent[0].message_group_id.as_deref(), Some("customer-7"));
    }

    #[tokio::test]
    async fn test_fifo_duplicate_publish_returns_original_id() {
        let (client, broker) = client_for("orders.fifo");

        let first = client
            .publish(Message::new("a").with_deduplication_id("same"))
            .await
            .unwrap();
        let second = client
            .publish(Message::new("a").with_deduplication_id("same"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.visible_count(client.queue()), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_wrapped_with_queue_and_operation() {
        let (client, _) = client_for("orders");
        let body = "x".repeat(ProviderType::InMemory.max_message_size() + 1);

        let error = client.publish(body).await.unwrap_err();

        match error {
            QueueError::Transport {
                queue,
                operation,
                source,
            } => {
                assert_eq!(queue, "orders");
                assert_eq!(operation, "publish");
                assert!(matches!(source, TransportError::MessageTooLarge { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_beyond_quota_waits_for_next_window() {
        let config = QueueConfig {
            rate_limit: RateLimitConfig {
                units: 2,
                window_millis: 1000,
            },
            ..Default::default()
        };
        let client = QueueClient::new(
            Arc::new(InMemoryTransport::default()),
            queue("orders"),
            config,
        );
        let start = Instant::now();

        client.publish("1").await.unwrap();
        client.publish("2").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        client.publish("3").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}

// ============================================================================
// Batch Publish
// ============================================================================

mod batch_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let (client, broker) = client_for("orders");
        let capacity = client.rate_limiter().capacity();

        let ids = client.publish_batch(Vec::<Message>::new()).await.unwrap();

        assert!(ids.is_empty());
        assert_eq!(broker.batch_submissions(), 0);
        // The full quota is still available
        assert!(client.rate_limiter().try_add(capacity));
    }

    #[tokio::test]
    async fn test_batch_is_split_into_transport_sized_chunks() {
        let (client, broker) = client_for("orders");
        let bodies: Vec<String> = (0..250).map(|i| format!("m-{}", i)).collect();

        let ids = client.publish_batch(bodies).await.unwrap();

        assert_eq!(ids.len(), 250);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 250);
        assert_eq!(broker.batch_submissions(), 3);
    }

    #[tokio::test]
    async fn test_refused_entries_converge_within_retry_budget() {
        // Arrange: "b" is refused on its first three submissions
        let (client, broker) = client_for("orders");
        broker.fail_batch_entry("b", "InternalError", 3);

        // Act
        let ids = client.publish_batch(vec!["a", "b", "c"]).await.unwrap();

        // Assert
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
        assert_eq!(broker.entry_attempts("a"), 1);
        assert_eq!(broker.entry_attempts("b"), 4);
        assert_eq!(broker.entry_attempts("c"), 1);
        assert_eq!(broker.visible_count(client.queue()), 3);
    }

    #[tokio::test]
    async fn test_always_refused_entry_exhausts_after_max_retry_plus_one_attempts() {
        let (client, broker) = client_for("orders");
        broker.fail_batch_entry("poison", "InvalidParameterValue", u32::MAX);

        let error = client
            .publish_batch(vec!["ok", "poison"])
            .await
            .unwrap_err();

        match &error {
            QueueError::BatchRetriesExhausted {
                queue,
                attempts,
                failures,
            } => {
                assert_eq!(queue, "orders");
                assert_eq!(*attempts, MAX_RETRY + 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].code, "InvalidParameterValue");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(error.to_string().contains("InvalidParameterValue"));
        assert_eq!(broker.entry_attempts("poison"), MAX_RETRY + 1);
        assert_eq!(broker.entry_attempts("ok"), 1);
    }

    #[tokio::test]
    async fn test_only_failed_subset_is_resubmitted() {
        let (client, broker) = client_for("orders");
        broker.fail_batch_entry("b", "InternalError", 1);

        client.publish_batch(vec!["a", "b"]).await.unwrap();

        assert_eq!(broker.batch_submissions(), 2);
        let bodies: Vec<_> = broker
            .enqueued_requests(client.queue())
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fifo_batch_is_decorated() {
        let (client, broker) = client_for("orders.fifo");

        client.publish_batch(vec!["a", "b"]).await.unwrap();

        for request in broker.enqueued_requests(client.queue()) {
            assert_eq!(
                request.message_group_id.as_deref(),
                Some(DEFAULT_MESSAGE_GROUP_ID)
            );
            assert!(request.deduplication_id.is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmission_waits_for_backoff() {
        let config = QueueConfig {
            batch_retry: BatchRetryConfig {
                initial_delay_millis: 200,
                use_jitter: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let broker = InMemoryTransport::default();
        let client = QueueClient::new(Arc::new(broker.clone()), queue("orders"), config);
        broker.fail_batch_entry("b", "InternalError", 2);
        let start = Instant::now();

        client.publish_batch(vec!["b"]).await.unwrap();

        // 200ms then 400ms
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmission_is_charged_to_rate_limiter() {
        let config = QueueConfig {
            rate_limit: RateLimitConfig {
                units: 2,
                window_millis: 1000,
            },
            ..Default::default()
        };
        let broker = InMemoryTransport::default();
        let client = QueueClient::new(Arc::new(broker.clone()), queue("orders"), config)
            .with_retry_policy(BatchRetryPolicy::immediate(4));
        broker.fail_batch_entry("a", "ThrottlingException", 1);
        broker.fail_batch_entry("b", "ThrottlingException", 1);
        let start = Instant::now();

        client.publish_batch(vec!["a", "b"]).await.unwrap();

        // The first round used the whole window; the resubmission waits for the next
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(broker.batch_submissions(), 2);
        assert_eq!(broker.entry_attempts("a"), 2);
        assert!(!client.rate_limiter().try_add(1));
    }
}

// ============================================================================
// Pull and Drain
// ============================================================================

mod pull_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pull_from_empty_queue_returns_none_after_wait() {
        let (client, _) = client_for("orders");
        let start = Instant::now();

        let handle = client.pull(Duration::from_secs(2)).await.unwrap();

        assert!(handle.is_none());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_pull_batch_defaults_to_configured_maximum() {
        let (client, _) = client_for("orders");
        let bodies: Vec<String> = (0..15).map(|i| i.to_string()).collect();
        client.publish_batch(bodies).await.unwrap();

        let batch = client.pull_batch(Duration::ZERO, None).await.unwrap();

        assert_eq!(batch.len(), 10);
    }

    #[tokio::test]
    async fn test_pull_batch_clamps_requested_count() {
        let (client, _) = client_for("orders");
        let bodies: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        client.publish_batch(bodies).await.unwrap();

        let none_requested = client.pull_batch(Duration::ZERO, Some(0)).await.unwrap();
        assert_eq!(none_requested.len(), 1);

        let too_many = client
            .pull_batch(Duration::ZERO, Some(1000))
            .await
            .unwrap();
        assert_eq!(too_many.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_all_handles_every_preloaded_message() {
        let (client, broker) = client_for("orders");
        let bodies: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        client.publish_batch(bodies).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handled = client
            .pull_all(&counting_handler(Arc::clone(&counter)))
            .await
            .unwrap();

        assert_eq!(handled, 25);
        assert_eq!(counter.load(Ordering::SeqCst), 25);
        assert_eq!(broker.acknowledged_count(), 25);
        assert_eq!(broker.visible_count(client.queue()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_all_returns_while_publisher_runs_concurrently() {
        let (client, broker) = client_for("orders");
        let preloaded: Vec<String> = (0..25).map(|i| format!("pre-{}", i)).collect();
        client.publish_batch(preloaded).await.unwrap();

        let publisher = client.clone();
        let producer = tokio::spawn(async move {
            for i in 0..10 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                publisher.publish(format!("late-{}", i)).await.unwrap();
            }
        });
        let counter = Arc::new(AtomicUsize::new(0));

        let handled = client
            .pull_all(&counting_handler(Arc::clone(&counter)))
            .await
            .unwrap();
        producer.await.unwrap();

        // Late arrivals seen before the first empty receive are part of the drain
        assert!(handled >= 25);
        assert_eq!(counter.load(Ordering::SeqCst), handled);
        assert_eq!(broker.acknowledged_count() as usize, handled);
        assert_eq!(handled + broker.visible_count(client.queue()), 35);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_all_on_empty_queue_returns_zero() {
        let (client, _) = client_for("orders");
        let counter = Arc::new(AtomicUsize::new(0));

        let handled = client
            .pull_all(&counting_handler(Arc::clone(&counter)))
            .await
            .unwrap();

        assert_eq!(handled, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_all_stops_on_handler_failure() {
        let (client, broker) = client_for("orders");
        client.publish_batch(vec!["good", "bad", "later"]).await.unwrap();
        let handler = handler_fn("picky", |body: String| async move {
            if body == "bad" {
                anyhow::bail!("cannot process {}", body);
            }
            Ok(())
        });

        let error = client.pull_all(&handler).await.unwrap_err();

        match error {
            QueueError::Handler {
                handler, body, ..
            } => {
                assert_eq!(handler, "picky");
                assert_eq!(body, "bad");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(broker.acknowledged_count(), 1);
        assert_eq!(broker.in_flight_count(client.queue()), 2);
    }

    #[tokio::test]
    async fn test_purge_empties_queue() {
        let (client, broker) = client_for("orders");
        client.publish_batch(vec!["a", "b"]).await.unwrap();

        client.purge().await.unwrap();

        assert_eq!(broker.visible_count(client.queue()), 0);
    }
}
