//! Partitioned in-memory broker.
//!
//! Messages are routed to a partition by a stable hash of their key. A
//! partition hands out at most one delivery at a time and only moves on once
//! that delivery is acknowledged, so messages sharing a key arrive in publish
//! order while different partitions are consumed in parallel.
//!
//! A delivery that is neither acked nor nacked within `ack_timeout` is handed
//! out again with `attempt + 1`.

use crate::error::ChannelError;
use crate::idempotency::compute_idempotency_key;
use crate::EventChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Partitions per topic (per-key ordering holds within a partition)
    pub partitions: usize,
    /// How long a delivery may stay unacknowledged before redelivery
    pub ack_timeout: Duration,
    /// Maximum unacknowledged messages per topic
    pub max_backlog: usize,
    /// Number of recent idempotency keys remembered per topic
    pub dedup_window: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            ack_timeout: Duration::from_secs(30),
            max_backlog: 10_000,
            dedup_window: 10_000,
        }
    }
}

// =============================================================================
// Topic state
// =============================================================================

struct Envelope {
    offset: u64,
    key: String,
    payload: Value,
    published_at: DateTime<Utc>,
}

struct InFlight {
    token: u64,
    attempt: u32,
    deadline: Instant,
}

#[derive(Default)]
struct Partition {
    queue: VecDeque<Envelope>,
    /// Set while the front of `queue` is handed out
    in_flight: Option<InFlight>,
}

struct TopicState {
    partitions: Vec<Partition>,
    next_offset: u64,
    next_token: u64,
    /// Partition to scan first on the next poll
    cursor: usize,
    backlog: usize,
    seen: HashMap<String, u64>,
    seen_order: VecDeque<String>,
}

struct Topic {
    name: String,
    state: Mutex<TopicState>,
    notify: Notify,
}

enum Poll {
    Ready(Delivery),
    /// Nothing deliverable; earliest in-flight deadline if any
    Wait(Option<Instant>),
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ChannelError> {
    mutex.lock().map_err(|e| ChannelError::Poisoned(e.to_string()))
}

/// Stable key → partition mapping.
fn partition_for(key: &str, partitions: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % partitions as u64) as usize
}

impl Topic {
    fn new(name: &str, partitions: usize) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TopicState {
                partitions: (0..partitions).map(|_| Partition::default()).collect(),
                next_offset: 0,
                next_token: 0,
                cursor: 0,
                backlog: 0,
                seen: HashMap::new(),
                seen_order: VecDeque::new(),
            }),
            notify: Notify::new(),
        }
    }

    fn publish(&self, key: &str, payload: Value, config: &BrokerConfig) -> Result<u64, ChannelError> {
        let idempotency_key = compute_idempotency_key(&self.name, key, &payload);

        let mut state = lock(&self.state)?;
        if let Some(offset) = state.seen.get(&idempotency_key) {
            debug!(topic = %self.name, key, offset, "Duplicate publish dropped");
            return Ok(*offset);
        }
        if state.backlog >= config.max_backlog {
            return Err(ChannelError::BacklogFull {
                topic: self.name.clone(),
                limit: config.max_backlog,
            });
        }

        let offset = state.next_offset;
        state.next_offset += 1;
        let index = partition_for(key, state.partitions.len());
        state.partitions[index].queue.push_back(Envelope {
            offset,
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        });
        state.backlog += 1;

        state.seen.insert(idempotency_key.clone(), offset);
        state.seen_order.push_back(idempotency_key);
        while state.seen_order.len() > config.dedup_window {
            if let Some(expired) = state.seen_order.pop_front() {
                state.seen.remove(&expired);
            }
        }
        drop(state);

        debug!(topic = %self.name, key, partition = index, offset, "Message published");
        self.notify.notify_waiters();
        Ok(offset)
    }

    fn poll(self: &Arc<Self>, ack_timeout: Duration) -> Result<Poll, ChannelError> {
        let mut guard = lock(&self.state)?;
        let TopicState { partitions, next_token, cursor, .. } = &mut *guard;

        let now = Instant::now();
        let count = partitions.len();
        let mut earliest: Option<Instant> = None;

        for step in 0..count {
            let index = (*cursor + step) % count;
            let partition = &mut partitions[index];
            let Some(front) = partition.queue.front() else {
                continue;
            };

            let attempt = match &partition.in_flight {
                None => 1,
                Some(flight) if flight.deadline <= now => flight.attempt + 1,
                Some(flight) => {
                    earliest = Some(earliest.map_or(flight.deadline, |e| e.min(flight.deadline)));
                    continue;
                },
            };

            let token = *next_token;
            *next_token += 1;
            *cursor = (index + 1) % count;
            partition.in_flight = Some(InFlight {
                token,
                attempt,
                deadline: now + ack_timeout,
            });

            if attempt > 1 {
                warn!(
                    topic = %self.name,
                    partition = index,
                    offset = front.offset,
                    attempt,
                    "Redelivering unacknowledged message"
                );
            }

            return Ok(Poll::Ready(Delivery {
                topic: self.name.clone(),
                partition: index,
                offset: front.offset,
                key: front.key.clone(),
                payload: front.payload.clone(),
                attempt,
                published_at: front.published_at,
                handle: AckHandle {
                    topic: Arc::clone(self),
                    partition: index,
                    offset: front.offset,
                    token,
                },
            }));
        }

        Ok(Poll::Wait(earliest))
    }

    fn settle(&self, partition: usize, offset: u64, token: u64, ack: bool) -> Result<(), ChannelError> {
        let mut guard = lock(&self.state)?;
        let TopicState { partitions, backlog, .. } = &mut *guard;

        let stale = || ChannelError::StaleDelivery { topic: self.name.clone(), offset };
        let slot = partitions.get_mut(partition).ok_or_else(stale)?;
        if !matches!(&slot.in_flight, Some(flight) if flight.token == token) {
            return Err(stale());
        }
        if ack {
            slot.queue.pop_front();
            slot.in_flight = None;
            *backlog = backlog.saturating_sub(1);
        } else if let Some(flight) = slot.in_flight.as_mut() {
            flight.deadline = Instant::now();
        }
        drop(guard);

        debug!(topic = %self.name, partition, offset, ack, "Delivery settled");
        self.notify.notify_waiters();
        Ok(())
    }
}

// =============================================================================
// Delivery / AckHandle
// =============================================================================

/// Acknowledgment handle for one delivery.
///
/// Dropping the handle without acking leaves the message in flight until the
/// ack timeout expires, after which it is redelivered.
pub struct AckHandle {
    topic: Arc<Topic>,
    partition: usize,
    offset: u64,
    token: u64,
}

impl AckHandle {
    /// Offset of the message this handle settles
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Mark the message processed; the partition moves on to the next message.
    pub fn ack(self) -> Result<(), ChannelError> {
        self.topic.settle(self.partition, self.offset, self.token, true)
    }

    /// Reject the message; it becomes deliverable again immediately.
    pub fn nack(self) -> Result<(), ChannelError> {
        self.topic.settle(self.partition, self.offset, self.token, false)
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("topic", &self.topic.name)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .finish()
    }
}

/// A message handed to a subscriber.
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Value,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
    handle: AckHandle,
}

impl Delivery {
    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ChannelError::Decode(e.to_string()))
    }

    pub fn ack(self) -> Result<(), ChannelError> {
        self.handle.ack()
    }

    pub fn nack(self) -> Result<(), ChannelError> {
        self.handle.nack()
    }

    /// Split into payload and ack handle.
    pub fn into_parts(self) -> (Value, AckHandle) {
        (self.payload, self.handle)
    }
}

// =============================================================================
// Broker
// =============================================================================

struct Shared {
    config: BrokerConfig,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    closed: AtomicBool,
}

/// In-process broker implementing [`EventChannel`].
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create a broker. A partition count of zero is raised to one.
    pub fn new(mut config: BrokerConfig) -> Self {
        config.partitions = config.partitions.max(1);
        Self {
            shared: Arc::new(Shared {
                config,
                topics: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, ChannelError> {
        let mut topics = lock(&self.shared.topics)?;
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name, self.shared.config.partitions)));
        Ok(Arc::clone(topic))
    }

    /// Close the broker. Pending `Subscription::next` calls return `None` and
    /// further publishes fail with `ChannelError::Closed`.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(topics) = lock(&self.shared.topics) {
            for topic in topics.values() {
                topic.notify.notify_waiters();
            }
        }
        info!("Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Messages on `topic` not yet acknowledged (including in-flight ones).
    pub fn backlog(&self, topic: &str) -> Result<usize, ChannelError> {
        let topic = self.topic(topic)?;
        let state = lock(&topic.state)?;
        Ok(state.backlog)
    }

    /// Deliveries on `topic` currently awaiting acknowledgment.
    pub fn in_flight(&self, topic: &str) -> Result<usize, ChannelError> {
        let topic = self.topic(topic)?;
        let state = lock(&topic.state)?;
        Ok(state.partitions.iter().filter(|p| p.in_flight.is_some()).count())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[async_trait]
impl EventChannel for MemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Value) -> Result<u64, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.topic(topic)?.publish(key, payload, &self.shared.config)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        Ok(Subscription {
            topic: self.topic(topic)?,
            shared: Arc::clone(&self.shared),
        })
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Stream of deliveries for one topic.
///
/// Clones share the topic's partitions, so several workers can consume the
/// same subscription in parallel without breaking per-key ordering.
#[derive(Clone)]
pub struct Subscription {
    topic: Arc<Topic>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    /// Wait for the next delivery. Returns `None` once the broker is closed.
    pub async fn next(&self) -> Option<Delivery> {
        loop {
            let notified = self.topic.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            let wait = match self.topic.poll(self.shared.config.ack_timeout) {
                Ok(Poll::Ready(delivery)) => return Some(delivery),
                Ok(Poll::Wait(wait)) => wait,
                Err(error) => {
                    warn!(topic = %self.topic.name, %error, "Subscription stopped");
                    return None;
                },
            };

            match wait {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(deadline) => {},
                    }
                },
                None => notified.await,
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic.name).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
