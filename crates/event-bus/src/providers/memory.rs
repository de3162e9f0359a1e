//! In-memory queue transport for testing and local development.
//!
//! This module provides a fully functional in-process broker that mirrors the
//! SQS semantics the client relies on:
//! - Visibility timeouts with redelivery of unacknowledged messages
//! - FIFO queues (`.fifo` suffix) with message groups and a deduplication window
//! - Long-poll receives that wake as soon as a message arrives
//! - Purge
//!
//! It also carries fault injection hooks so client policy (batch retry,
//! subscriber recovery) can be exercised deterministically.
//!
//! All deadlines use `tokio::time::Instant`, so tests may pause and advance
//! time freely.

use crate::error::{BatchEntryFailure, TransportError};
use crate::message::{
    BatchOutcome, EnqueueRequest, FailedEntry, MessageId, QueueName, ReceiptHandle,
    ReceivedMessage, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
    faults: FaultPlan,
    stats: Stats,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
            faults: FaultPlan::default(),
            stats: Stats::default(),
        }
    }

    /// Get or create a queue
    fn queue_mut(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues
            .entry(queue_name.clone())
            .or_insert_with(|| InMemoryQueue::new(queue_name.is_fifo()))
    }

    fn enqueue_locked(
        &mut self,
        queue_name: &QueueName,
        request: &EnqueueRequest,
    ) -> Result<MessageId, TransportError> {
        let max_size = ProviderType::InMemory.max_message_size();
        if request.body.len() > max_size {
            return Err(TransportError::MessageTooLarge {
                size: request.body.len(),
                max_size,
            });
        }

        let max_queue_size = self.config.max_queue_size;
        let dedup_window = Duration::from_secs(self.config.deduplication_window_seconds);
        let queue = self.queue_mut(queue_name);
        let now = Instant::now();

        if queue.fifo {
            if request.message_group_id.is_none() {
                return Err(TransportError::InvalidRequest {
                    message: format!(
                        "MessageGroupId is required for FIFO queue {}",
                        queue_name
                    ),
                });
            }

            queue
                .deduplication
                .retain(|_, (_, seen_at)| now.duration_since(*seen_at) < dedup_window);

            if let Some(dedup_id) = &request.deduplication_id {
                if let Some((existing, _)) = queue.deduplication.get(dedup_id) {
                    debug!(
                        queue = %queue_name,
                        deduplication_id = %dedup_id,
                        "Duplicate publish suppressed"
                    );
                    return Ok(existing.clone());
                }
            }
        }

        if queue.len() >= max_queue_size {
            return Err(TransportError::Service {
                code: "QueueFull".to_string(),
                message: format!("queue {} holds {} messages", queue_name, max_queue_size),
            });
        }

        let message_id = MessageId::new();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.available.insert(
            sequence,
            StoredMessage {
                message_id: message_id.clone(),
                body: request.body.clone(),
                message_group_id: request.message_group_id.clone(),
                delivery_count: 0,
            },
        );

        if queue.fifo {
            if let Some(dedup_id) = &request.deduplication_id {
                queue
                    .deduplication
                    .insert(dedup_id.clone(), (message_id.clone(), now));
            }
        }

        self.stats.record_enqueue(queue_name, request);

        Ok(message_id)
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    fifo: bool,
    next_sequence: u64,
    /// Visible messages keyed by publish sequence, so redelivered messages
    /// return to their original position
    available: BTreeMap<u64, StoredMessage>,
    /// Received but unacknowledged messages keyed by receipt token
    in_flight: HashMap<String, InFlightMessage>,
    /// FIFO deduplication ids and when they were first seen
    deduplication: HashMap<String, (MessageId, Instant)>,
}

impl InMemoryQueue {
    fn new(fifo: bool) -> Self {
        Self {
            fifo,
            next_sequence: 0,
            available: BTreeMap::new(),
            in_flight: HashMap::new(),
            deduplication: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.available.len() + self.in_flight.len()
    }

    /// Return messages whose visibility timeout lapsed to the visible set
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                self.available.insert(in_flight.sequence, in_flight.message);
            }
        }
    }

    /// Earliest moment an in-flight message becomes visible again
    fn next_visibility_change(&self) -> Option<Instant> {
        self.in_flight.values().map(|m| m.visible_at).min()
    }

    fn take_visible(
        &mut self,
        max_messages: usize,
        visibility: Duration,
    ) -> Vec<(String, StoredMessage)> {
        // A FIFO group with an unacknowledged message is locked for everyone else
        let locked_groups: HashSet<String> = if self.fifo {
            self.in_flight
                .values()
                .filter_map(|m| m.message.message_group_id.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let selected: Vec<u64> = self
            .available
            .iter()
            .filter(|(_, m)| {
                m.message_group_id
                    .as_ref()
                    .map_or(true, |group| !locked_groups.contains(group))
            })
            .map(|(sequence, _)| *sequence)
            .take(max_messages)
            .collect();

        let visible_at = Instant::now() + visibility;
        let mut taken = Vec::with_capacity(selected.len());
        for sequence in selected {
            if let Some(mut message) = self.available.remove(&sequence) {
                message.delivery_count += 1;
                let token = uuid::Uuid::new_v4().to_string();
                self.in_flight.insert(
                    token.clone(),
                    InFlightMessage {
                        sequence,
                        message: message.clone(),
                        visible_at,
                    },
                );
                taken.push((token, message));
            }
        }

        taken
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    message_group_id: Option<String>,
    delivery_count: u32,
}

/// A message currently being processed
struct InFlightMessage {
    sequence: u64,
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct FaultPlan {
    /// Batch entries to refuse, keyed by body: (remaining refusals, error code)
    batch_entries: HashMap<String, (u32, String)>,
    receive_failures: u32,
    acknowledge_failures: u32,
}

/// Most requests remembered per queue, and most distinct bodies counted
const HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
struct Stats {
    enqueued: HashMap<QueueName, VecDeque<EnqueueRequest>>,
    batch_submissions: u32,
    entry_attempts: HashMap<String, u32>,
    acknowledged: u32,
}

impl Stats {
    fn record_enqueue(&mut self, queue: &QueueName, request: &EnqueueRequest) {
        let history = self.enqueued.entry(queue.clone()).or_default();
        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(request.clone());
    }

    fn record_attempt(&mut self, body: &str) {
        if let Some(attempts) = self.entry_attempts.get_mut(body) {
            *attempts += 1;
        } else if self.entry_attempts.len() < HISTORY_LIMIT {
            self.entry_attempts.insert(body.to_string(), 1);
        }
    }

    fn forget_queue(&mut self, queue: &QueueName) {
        self.enqueued.remove(queue);
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport implementation
///
/// Cloning is cheap and clones share the same broker state, so a test can
/// keep one clone for inspection while the client owns another.
#[derive(Clone)]
pub struct InMemoryTransport {
    storage: Arc<Mutex<QueueStorage>>,
    arrivals: Arc<Notify>,
}

impl InMemoryTransport {
    /// Create new in-memory transport with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::new(config))),
            arrivals: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the batch entry with this body for its next `times` submissions
    pub fn fail_batch_entry(&self, body: impl Into<String>, code: impl Into<String>, times: u32) {
        self.lock()
            .faults
            .batch_entries
            .insert(body.into(), (times, code.into()));
    }

    /// Fail the next `times` receive calls with a connection error
    pub fn fail_receives(&self, times: u32) {
        self.lock().faults.receive_failures = times;
    }

    /// Fail the next `times` acknowledge calls with a service error
    pub fn fail_acknowledgements(&self, times: u32) {
        self.lock().faults.acknowledge_failures = times;
    }

    /// Number of messages currently visible to receivers
    pub fn visible_count(&self, queue: &QueueName) -> usize {
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue);
        queue.release_expired(Instant::now());
        queue.available.len()
    }

    /// Number of received but unacknowledged messages
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue);
        queue.release_expired(Instant::now());
        queue.in_flight.len()
    }

    /// Requests the broker accepted for this queue since its last purge, in
    /// arrival order; only the most recent 1024 are kept
    pub fn enqueued_requests(&self, queue: &QueueName) -> Vec<EnqueueRequest> {
        self.lock()
            .stats
            .enqueued
            .get(queue)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `enqueue_batch` calls received
    pub fn batch_submissions(&self) -> u32 {
        self.lock().stats.batch_submissions
    }

    /// Number of times a batch entry with this body was submitted
    ///
    /// Counting stops for new bodies once 1024 distinct ones were seen.
    pub fn entry_attempts(&self, body: &str) -> u32 {
        self.lock()
            .stats
            .entry_attempts
            .get(body)
            .copied()
            .unwrap_or(0)
    }

    /// Number of successful acknowledgements
    pub fn acknowledged_count(&self) -> u32 {
        self.lock().stats.acknowledged
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn enqueue(
        &self,
        queue: &QueueName,
        request: &EnqueueRequest,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.lock().enqueue_locked(queue, request)?;
        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn enqueue_batch(
        &self,
        queue: &QueueName,
        requests: &[EnqueueRequest],
    ) -> Result<BatchOutcome, TransportError> {
        if requests.len() > self.max_batch_size() {
            return Err(TransportError::InvalidRequest {
                message: format!(
                    "TooManyEntriesInBatchRequest: {} entries (max: {})",
                    requests.len(),
                    self.max_batch_size()
                ),
            });
        }

        let mut outcome = BatchOutcome::default();
        {
            let mut storage = self.lock();
            storage.stats.batch_submissions += 1;

            for request in requests {
                storage.stats.record_attempt(&request.body);

                let injected = storage.faults.batch_entries.get_mut(&request.body);
                if let Some((remaining, code)) = injected {
                    if *remaining > 0 {
                        *remaining -= 1;
                        let failure = BatchEntryFailure {
                            code: code.clone(),
                            reason: "injected failure".to_string(),
                            sender_fault: false,
                        };
                        if *remaining == 0 {
                            storage.faults.batch_entries.remove(&request.body);
                        }
                        outcome.failed.push(FailedEntry {
                            request: request.clone(),
                            failure,
                        });
                        continue;
                    }
                }

                match storage.enqueue_locked(queue, request) {
                    Ok(message_id) => outcome.succeeded.push(message_id),
                    Err(e) => outcome.failed.push(FailedEntry {
                        request: request.clone(),
                        failure: BatchEntryFailure {
                            code: failure_code(&e),
                            reason: e.to_string(),
                            sender_fault: !e.is_transient(),
                        },
                    }),
                }
            }
        }

        if !outcome.succeeded.is_empty() {
            self.arrivals.notify_waiters();
        }
        Ok(outcome)
    }

    async fn receive_up_to(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let now = Instant::now();
        // Roughly 30 years, the same horizon tokio uses for an unbounded sleep
        let deadline = now
            .checked_add(wait)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30));

        loop {
            // Register before inspecting the queue so an arrival in between is not missed
            let arrival = self.arrivals.notified();

            let (taken, next_change) = {
                let mut storage = self.lock();
                if storage.faults.receive_failures > 0 {
                    storage.faults.receive_failures -= 1;
                    return Err(TransportError::ConnectionFailed {
                        message: "injected receive failure".to_string(),
                    });
                }

                let in_memory_queue = storage.queue_mut(queue);
                in_memory_queue.release_expired(Instant::now());
                let taken =
                    in_memory_queue.take_visible(max_messages as usize, visibility_timeout);
                (taken, in_memory_queue.next_visibility_change())
            };

            if !taken.is_empty() {
                let expires_at = Timestamp::from_datetime(
                    chrono::Utc::now()
                        + chrono::Duration::from_std(visibility_timeout)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                );

                return Ok(taken
                    .into_iter()
                    .map(|(token, message)| ReceivedMessage {
                        message_id: message.message_id,
                        body: message.body,
                        receipt_handle: ReceiptHandle::new(
                            token,
                            queue.clone(),
                            expires_at.clone(),
                            ProviderType::InMemory,
                        ),
                        message_group_id: message.message_group_id,
                        delivery_count: message.delivery_count,
                        received_at: Timestamp::now(),
                    })
                    .collect());
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_change.map_or(deadline, |change| change.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, arrival).await;
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let mut storage = self.lock();
        if storage.faults.acknowledge_failures > 0 {
            storage.faults.acknowledge_failures -= 1;
            return Err(TransportError::Service {
                code: "InternalError".to_string(),
                message: "injected acknowledge failure".to_string(),
            });
        }

        let queue = storage.queue_mut(receipt.queue());
        queue.release_expired(Instant::now());
        if queue.in_flight.remove(receipt.handle()).is_none() {
            return Err(TransportError::InvalidReceipt {
                receipt: receipt.handle().to_string(),
            });
        }

        storage.stats.acknowledged += 1;
        Ok(())
    }

    async fn purge(&self, queue: &QueueName) -> Result<(), TransportError> {
        let mut storage = self.lock();
        storage.stats.forget_queue(queue);
        let stored = storage.queue_mut(queue);
        stored.available.clear();
        stored.in_flight.clear();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

fn failure_code(error: &TransportError) -> String {
    match error {
        TransportError::Service { code, .. } => code.clone(),
        TransportError::MessageTooLarge { .. } => "MessageTooLong".to_string(),
        TransportError::InvalidRequest { .. } => "InvalidParameterValue".to_string(),
        _ => "InternalError".to_string(),
    }
}
