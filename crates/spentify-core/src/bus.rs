//! Partitioned message bus contract and an in-process implementation.
//!
//! Delivery is at-least-once: a message stays on its partition until the
//! consumer group acknowledges or dead-letters it, and a negatively
//! acknowledged message is handed out again after a delay. Each partition
//! has at most one message in flight per consumer group, so messages that
//! share a key are delivered in publish order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::envelope::BusMessage;

/// Bus failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("message bus is closed")]
    Closed,

    /// An ack, nack or dead-letter named a delivery that is not in flight.
    #[error("delivery at partition {partition} offset {offset} is not in flight")]
    NotInFlight {
        /// Partition of the delivery.
        partition: u32,
        /// Offset of the delivery.
        offset: u64,
    },

    /// The broker rejected a publish.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The broker could not be reached or failed mid-operation.
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// Position of one delivered message and how often it has been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Partition the message lives on.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// A message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The message itself.
    pub message: BusMessage,
    /// Where it came from.
    pub delivery: Delivery,
}

/// Publishes messages to a topic.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes `message` to `topic`, partitioned by its key.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the broker did not accept the message. The
    /// caller must treat the message as unpublished.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError>;
}

/// A consumer group's view of a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next deliverable message. Returns `None` once the bus
    /// is closed.
    async fn next(&mut self) -> Option<ReceivedMessage>;

    /// Marks the delivery as consumed and releases its partition.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NotInFlight` if the delivery is not outstanding.
    async fn ack(&mut self, delivery: Delivery) -> Result<(), BusError>;

    /// Returns the delivery to its partition to be redelivered no earlier
    /// than `redeliver_after` from now.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NotInFlight` if the delivery is not outstanding.
    async fn nack(&mut self, delivery: Delivery, redeliver_after: Duration)
    -> Result<(), BusError>;

    /// Moves the delivery to the dead-letter queue and releases its
    /// partition.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NotInFlight` if the delivery is not outstanding.
    async fn dead_letter(&mut self, delivery: Delivery, reason: &str) -> Result<(), BusError>;
}

/// A partitioned bus that the relay publishes to and consumers subscribe
/// from.
#[async_trait]
pub trait MessageBus: MessagePublisher {
    /// The partitioner applied to every topic.
    fn partitioner(&self) -> Partitioner;

    /// Opens a subscription for `group` on the given partitions of `topic`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the broker cannot set up the subscription.
    async fn open_subscription(
        &self,
        topic: &str,
        group: &str,
        partitions: Vec<u32>,
    ) -> Result<Box<dyn Subscription>, BusError>;
}

/// Maps a message key to a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partitions: u32,
}

impl Partitioner {
    /// Creates a partitioner over `partitions` partitions (at least one).
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    /// Number of partitions.
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Stable partition for `key`.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        prefix % self.partitions
    }
}

/// A message that exhausted its retries or could not be decoded.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Source topic.
    pub topic: String,
    /// Consumer group that gave up on the message.
    pub group: String,
    /// Original position.
    pub delivery: Delivery,
    /// The message.
    pub message: BusMessage,
    /// Why it was dead-lettered.
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
struct PartitionCursor {
    next_offset: u64,
    in_flight: Option<u64>,
    not_before: Option<Instant>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, Vec<Vec<BusMessage>>>,
    groups: HashMap<(String, String), Vec<PartitionCursor>>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

fn message_at(
    logs: Option<&Vec<Vec<BusMessage>>>,
    partition: u32,
    offset: u64,
) -> Option<&BusMessage> {
    let offset = usize::try_from(offset).ok()?;
    logs?.get(partition as usize)?.get(offset)
}

enum Next {
    Ready(ReceivedMessage),
    Wait(Option<Instant>),
}

impl Inner {
    fn topic_mut(&mut self, topic: &str, partitions: u32) -> &mut Vec<Vec<BusMessage>> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
    }

    fn cursors_mut(&mut self, topic: &str, group: &str, partitions: u32) -> &mut Vec<PartitionCursor> {
        self.groups
            .entry((topic.to_owned(), group.to_owned()))
            .or_insert_with(|| vec![PartitionCursor::default(); partitions as usize])
    }

    fn poll(&mut self, sub: &Target, start: usize, now: Instant) -> Next {
        let Self { topics, groups, .. } = self;
        let logs = topics.get(&sub.topic);
        let cursors = groups
            .entry((sub.topic.clone(), sub.group.clone()))
            .or_insert_with(|| vec![PartitionCursor::default(); sub.partitions_total as usize]);
        let mut earliest: Option<Instant> = None;

        for step in 0..sub.assigned.len() {
            let partition = sub.assigned[(start + step) % sub.assigned.len()];
            let Some(cursor) = cursors.get_mut(partition as usize) else {
                continue;
            };
            if cursor.in_flight.is_some() {
                continue;
            }
            let Some(message) = message_at(logs, partition, cursor.next_offset) else {
                continue;
            };
            if let Some(not_before) = cursor.not_before.filter(|nb| *nb > now) {
                earliest = Some(earliest.map_or(not_before, |e| e.min(not_before)));
                continue;
            }

            cursor.in_flight = Some(cursor.next_offset);
            cursor.not_before = None;
            cursor.attempts += 1;
            return Next::Ready(ReceivedMessage {
                message: message.clone(),
                delivery: Delivery {
                    partition,
                    offset: cursor.next_offset,
                    attempt: cursor.attempts,
                },
            });
        }
        Next::Wait(earliest)
    }

    fn in_flight_cursor(
        &mut self,
        sub: &Target,
        delivery: Delivery,
    ) -> Result<&mut PartitionCursor, BusError> {
        self.groups
            .get_mut(&(sub.topic.clone(), sub.group.clone()))
            .and_then(|cursors| cursors.get_mut(delivery.partition as usize))
            .filter(|cursor| cursor.in_flight == Some(delivery.offset))
            .ok_or(BusError::NotInFlight {
                partition: delivery.partition,
                offset: delivery.offset,
            })
    }

    fn release(&mut self, sub: &Target, delivery: Delivery) -> Result<(), BusError> {
        let cursor = self.in_flight_cursor(sub, delivery)?;
        cursor.in_flight = None;
        cursor.next_offset = delivery.offset + 1;
        cursor.attempts = 0;
        Ok(())
    }
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    partitioner: Partitioner,
}

/// In-process partitioned bus with consumer groups, delayed redelivery and a
/// dead-letter queue.
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    /// Creates a bus whose topics have `partitions` partitions.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
                partitioner: Partitioner::new(partitions),
            }),
        }
    }

    /// The partitioner used for every topic.
    #[must_use]
    pub fn partitioner(&self) -> Partitioner {
        self.shared.partitioner
    }

    /// Subscribes `group` to every partition of `topic`.
    pub async fn subscribe(&self, topic: &str, group: &str) -> BusSubscription {
        let all = (0..self.shared.partitioner.partitions()).collect();
        self.subscribe_partitions(topic, group, all).await
    }

    /// Subscribes `group` to the given partitions of `topic`.
    pub async fn subscribe_partitions(
        &self,
        topic: &str,
        group: &str,
        partitions: Vec<u32>,
    ) -> BusSubscription {
        let total = self.shared.partitioner.partitions();
        {
            let mut inner = self.shared.inner.lock().await;
            inner.topic_mut(topic, total);
            inner.cursors_mut(topic, group, total);
        }
        BusSubscription {
            shared: Arc::clone(&self.shared),
            target: Target {
                topic: topic.to_owned(),
                group: group.to_owned(),
                assigned: partitions.into_iter().filter(|p| *p < total).collect(),
                partitions_total: total,
            },
            rotation: 0,
        }
    }

    /// Moves `group`'s read position on `partition` back to `offset`, as a
    /// consumer restart after an uncommitted read would. Messages from
    /// `offset` on are delivered again.
    pub async fn rewind(&self, topic: &str, group: &str, partition: u32, offset: u64) {
        let total = self.shared.partitioner.partitions();
        let mut inner = self.shared.inner.lock().await;
        if let Some(cursor) = inner
            .cursors_mut(topic, group, total)
            .get_mut(partition as usize)
        {
            *cursor = PartitionCursor {
                next_offset: offset,
                ..PartitionCursor::default()
            };
        }
        drop(inner);
        self.shared.notify.notify_waiters();
    }

    /// Every message ever published to `topic`, partition by partition.
    pub async fn messages(&self, topic: &str) -> Vec<BusMessage> {
        let inner = self.shared.inner.lock().await;
        inner
            .topics
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages on one partition of `topic`, in offset order.
    pub async fn partition_messages(&self, topic: &str, partition: u32) -> Vec<BusMessage> {
        let inner = self.shared.inner.lock().await;
        inner
            .topics
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Messages `group` has not yet acknowledged or dead-lettered.
    pub async fn lag(&self, topic: &str, group: &str) -> u64 {
        let inner = self.shared.inner.lock().await;
        let Some(logs) = inner.topics.get(topic) else {
            return 0;
        };
        let cursors = inner.groups.get(&(topic.to_owned(), group.to_owned()));
        logs.iter()
            .enumerate()
            .map(|(partition, log)| {
                let consumed = cursors
                    .and_then(|c| c.get(partition))
                    .map_or(0, |c| c.next_offset);
                (log.len() as u64).saturating_sub(consumed)
            })
            .sum()
    }

    /// Dead-lettered messages across all topics and groups.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.inner.lock().await.dead_letters.clone()
    }

    /// Closes the bus. Pending and future `next` calls return `None` and
    /// publishes fail.
    pub async fn close(&self) {
        self.shared.inner.lock().await.closed = true;
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        let partitioner = self.shared.partitioner;
        let partition = partitioner.partition_for(&message.key) as usize;
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.closed {
                return Err(BusError::Closed);
            }
            let logs = inner.topic_mut(topic, partitioner.partitions());
            let log = logs
                .get_mut(partition)
                .ok_or_else(|| BusError::Rejected(format!("partition {partition} does not exist")))?;
            log.push(message);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn partitioner(&self) -> Partitioner {
        self.shared.partitioner
    }

    async fn open_subscription(
        &self,
        topic: &str,
        group: &str,
        partitions: Vec<u32>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        Ok(Box::new(
            self.subscribe_partitions(topic, group, partitions).await,
        ))
    }
}

struct Target {
    topic: String,
    group: String,
    assigned: Vec<u32>,
    partitions_total: u32,
}

/// A subscription to an [`InMemoryBus`] topic.
pub struct BusSubscription {
    shared: Arc<Shared>,
    target: Target,
    rotation: usize,
}

impl BusSubscription {
    /// Partitions this subscription reads.
    #[must_use]
    pub fn partitions(&self) -> &[u32] {
        &self.target.assigned
    }
}

#[async_trait]
impl Subscription for BusSubscription {
    async fn next(&mut self) -> Option<ReceivedMessage> {
        if self.target.assigned.is_empty() {
            return None;
        }
        loop {
            let notified = self.shared.notify.notified();
            let next = {
                let mut inner = self.shared.inner.lock().await;
                if inner.closed {
                    return None;
                }
                inner.poll(&self.target, self.rotation, Instant::now())
            };
            match next {
                Next::Ready(received) => {
                    self.rotation = self.rotation.wrapping_add(1);
                    return Some(received);
                }
                Next::Wait(Some(deadline)) => {
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Next::Wait(None) => notified.await,
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BusError> {
        self.shared
            .inner
            .lock()
            .await
            .release(&self.target, delivery)?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(
        &mut self,
        delivery: Delivery,
        redeliver_after: Duration,
    ) -> Result<(), BusError> {
        {
            let mut inner = self.shared.inner.lock().await;
            let cursor = inner.in_flight_cursor(&self.target, delivery)?;
            cursor.in_flight = None;
            cursor.not_before = Some(Instant::now() + redeliver_after);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: Delivery, reason: &str) -> Result<(), BusError> {
        {
            let mut inner = self.shared.inner.lock().await;
            inner.in_flight_cursor(&self.target, delivery)?;
            let message = message_at(
                inner.topics.get(&self.target.topic),
                delivery.partition,
                delivery.offset,
            )
            .cloned()
            .ok_or(BusError::NotInFlight {
                partition: delivery.partition,
                offset: delivery.offset,
            })?;
            inner.release(&self.target, delivery)?;
            inner.dead_letters.push(DeadLetter {
                topic: self.target.topic.clone(),
                group: self.target.group.clone(),
                delivery,
                message,
                reason: reason.to_owned(),
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
