//! `PostgreSQL` message bus.
//!
//! Topics are partitioned logs in `bus_message`. Each consumer group keeps
//! one `bus_cursor` row per partition, and a delivery is in flight while
//! that row carries a lease. Any subscription of the group may claim a
//! partition whose lease is free or expired, so several service instances
//! share one group, and a delivery held by an instance that died is handed
//! out again once its lease runs out. Publishers `NOTIFY` on commit to wake
//! waiting subscribers; subscribers also poll.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spentify_core::bus::{
    BusError, DeadLetter, Delivery, MessageBus, MessagePublisher, Partitioner, ReceivedMessage,
    Subscription,
};
use spentify_core::envelope::BusMessage;
use sqlx::postgres::{PgArguments, PgListener};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Channel notified after every publish. The payload is the topic.
pub const NOTIFY_CHANNEL: &str = "spentify_bus";

/// Default lease on an in-flight delivery.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait between claim attempts when nothing is deliverable.
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

const CLAIM: &str = "UPDATE bus_cursor AS c
    SET leased_by = $4,
        lease_expires_at = NOW() + make_interval(secs => $5),
        attempts = c.attempts + 1,
        not_before = NULL
    FROM bus_message AS m
    WHERE c.topic = $1 AND c.consumer_group = $2 AND c.partition_id = $3
      AND m.topic = c.topic
      AND m.partition_id = c.partition_id
      AND m.message_offset = c.next_offset
      AND (c.not_before IS NULL OR c.not_before <= NOW())
      AND (c.leased_by IS NULL OR c.lease_expires_at <= NOW())
    RETURNING c.next_offset, c.attempts, m.message_key, m.headers, m.body";

const ACK: &str = "UPDATE bus_cursor
    SET next_offset = next_offset + 1, attempts = 0, not_before = NULL,
        leased_by = NULL, lease_expires_at = NULL
    WHERE topic = $1 AND consumer_group = $2 AND partition_id = $3
      AND next_offset = $4 AND leased_by = $5";

const NACK: &str = "UPDATE bus_cursor
    SET not_before = NOW() + make_interval(secs => $6),
        leased_by = NULL, lease_expires_at = NULL
    WHERE topic = $1 AND consumer_group = $2 AND partition_id = $3
      AND next_offset = $4 AND leased_by = $5";

const COPY_TO_DEAD_LETTERS: &str = "INSERT INTO bus_dead_letter
        (topic, consumer_group, partition_id, message_offset, attempt,
         message_key, headers, body, reason)
    SELECT c.topic, c.consumer_group, c.partition_id, c.next_offset, $6,
           m.message_key, m.headers, m.body, $7
    FROM bus_cursor AS c
    JOIN bus_message AS m
      ON m.topic = c.topic
     AND m.partition_id = c.partition_id
     AND m.message_offset = c.next_offset
    WHERE c.topic = $1 AND c.consumer_group = $2 AND c.partition_id = $3
      AND c.next_offset = $4 AND c.leased_by = $5";

type ClaimRow = (i64, i32, String, Json<BTreeMap<String, String>>, Vec<u8>);

type DeadLetterRow = (
    String,
    String,
    i32,
    i64,
    i32,
    String,
    Json<BTreeMap<String, String>>,
    Vec<u8>,
    String,
);

fn transport(err: sqlx::Error) -> BusError {
    BusError::Transport(err.to_string())
}

fn to_delivery(partition: i32, offset: i64, attempt: i32) -> Delivery {
    Delivery {
        partition: u32::try_from(partition).unwrap_or_default(),
        offset: u64::try_from(offset).unwrap_or_default(),
        attempt: u32::try_from(attempt).unwrap_or_default(),
    }
}

fn not_in_flight(delivery: Delivery) -> BusError {
    BusError::NotInFlight {
        partition: delivery.partition,
        offset: delivery.offset,
    }
}

/// Message bus over a dedicated `PostgreSQL` database.
#[derive(Debug, Clone)]
pub struct PgBus {
    pool: PgPool,
    partitioner: Partitioner,
    lease_timeout: Duration,
    poll_interval: Duration,
    closed: Arc<watch::Sender<bool>>,
}

impl PgBus {
    /// Creates a bus whose topics have `partitions` partitions.
    #[must_use]
    pub fn new(pool: PgPool, partitions: u32) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            pool,
            partitioner: Partitioner::new(partitions),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
            closed: Arc::new(closed),
        }
    }

    /// Sets how long a claimed delivery stays leased before another
    /// subscription may take it.
    #[must_use]
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Sets the wait between claim attempts when nothing is deliverable.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Closes the bus for this process. Pending and future `next` calls on
    /// its subscriptions return `None` and publishes fail.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Dead letters of every topic and group, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Transport` if the query fails.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, BusError> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT topic, consumer_group, partition_id, message_offset, attempt,
                    message_key, headers, body, reason
             FROM bus_dead_letter
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        Ok(rows
            .into_iter()
            .map(
                |(topic, group, partition, offset, attempt, key, Json(headers), body, reason)| {
                    DeadLetter {
                        topic,
                        group,
                        delivery: to_delivery(partition, offset, attempt),
                        message: BusMessage { key, headers, body },
                        reason,
                    }
                },
            )
            .collect())
    }
}

#[async_trait]
impl MessagePublisher for PgBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        if *self.closed.borrow() {
            return Err(BusError::Closed);
        }
        let partition = i32::try_from(self.partitioner.partition_for(&message.key))
            .map_err(|e| BusError::Rejected(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(transport)?;
        // Offsets are assigned under a per-partition lock, so they are
        // gapless and follow commit order.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(topic)
            .bind(partition)
            .execute(&mut *tx)
            .await
            .map_err(transport)?;
        sqlx::query(
            "INSERT INTO bus_message
                 (topic, partition_id, message_offset, message_key, headers, body)
             SELECT $1, $2, COALESCE(MAX(message_offset) + 1, 0), $3, $4, $5
             FROM bus_message
             WHERE topic = $1 AND partition_id = $2",
        )
        .bind(topic)
        .bind(partition)
        .bind(&message.key)
        .bind(Json(&message.headers))
        .bind(&message.body)
        .execute(&mut *tx)
        .await
        .map_err(|e| BusError::Rejected(e.to_string()))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(topic)
            .execute(&mut *tx)
            .await
            .map_err(transport)?;
        tx.commit().await.map_err(transport)?;

        debug!(topic, partition, key = %message.key, "message published");
        Ok(())
    }
}

#[async_trait]
impl MessageBus for PgBus {
    fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    async fn open_subscription(
        &self,
        topic: &str,
        group: &str,
        partitions: Vec<u32>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let total = self.partitioner.partitions();
        let partitions: Vec<i32> = partitions
            .into_iter()
            .filter(|p| *p < total)
            .filter_map(|p| i32::try_from(p).ok())
            .collect();

        for partition in &partitions {
            sqlx::query(
                "INSERT INTO bus_cursor (topic, consumer_group, partition_id)
                 VALUES ($1, $2, $3)
                 ON CONFLICT DO NOTHING",
            )
            .bind(topic)
            .bind(group)
            .bind(partition)
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        }

        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(transport)?;
        listener.listen(NOTIFY_CHANNEL).await.map_err(transport)?;

        let subscriber = Uuid::new_v4();
        info!(topic, group, %subscriber, ?partitions, "bus subscription opened");
        Ok(Box::new(PgSubscription {
            pool: self.pool.clone(),
            listener,
            topic: topic.to_owned(),
            group: group.to_owned(),
            partitions,
            subscriber,
            lease_timeout: self.lease_timeout,
            poll_interval: self.poll_interval,
            closed: self.closed.subscribe(),
            rotation: 0,
        }))
    }
}

/// A consumer group member reading some partitions of a [`PgBus`] topic.
pub struct PgSubscription {
    pool: PgPool,
    listener: PgListener,
    topic: String,
    group: String,
    partitions: Vec<i32>,
    subscriber: Uuid,
    lease_timeout: Duration,
    poll_interval: Duration,
    closed: watch::Receiver<bool>,
    rotation: usize,
}

impl PgSubscription {
    async fn claim(&mut self) -> Result<Option<ReceivedMessage>, sqlx::Error> {
        let count = self.partitions.len();
        for step in 0..count {
            let partition = self.partitions[(self.rotation + step) % count];
            let row: Option<ClaimRow> = sqlx::query_as(CLAIM)
                .bind(&self.topic)
                .bind(&self.group)
                .bind(partition)
                .bind(self.subscriber)
                .bind(self.lease_timeout.as_secs_f64())
                .fetch_optional(&self.pool)
                .await?;
            if let Some((offset, attempts, key, Json(headers), body)) = row {
                self.rotation = self.rotation.wrapping_add(1);
                return Ok(Some(ReceivedMessage {
                    message: BusMessage { key, headers, body },
                    delivery: to_delivery(partition, offset, attempts),
                }));
            }
        }
        Ok(None)
    }

    /// Waits for a publish notification, the poll interval or close.
    /// Returns `false` once the bus is closed or gone.
    async fn wait(&mut self) -> bool {
        let poll = tokio::time::sleep(self.poll_interval);
        tokio::select! {
            changed = self.closed.changed() => {
                changed.is_ok() && !*self.closed.borrow()
            }
            () = poll => true,
            notification = self.listener.recv() => {
                if let Err(err) = notification {
                    warn!(topic = %self.topic, error = %err, "bus listener failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
                true
            }
        }
    }

    fn in_flight<'q>(
        &'q self,
        sql: &'q str,
        delivery: Delivery,
    ) -> Result<Query<'q, Postgres, PgArguments>, BusError> {
        let partition = i32::try_from(delivery.partition).map_err(|_| not_in_flight(delivery))?;
        let offset = i64::try_from(delivery.offset).map_err(|_| not_in_flight(delivery))?;
        Ok(sqlx::query(sql)
            .bind(&self.topic)
            .bind(&self.group)
            .bind(partition)
            .bind(offset)
            .bind(self.subscriber))
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn next(&mut self) -> Option<ReceivedMessage> {
        if self.partitions.is_empty() {
            return None;
        }
        loop {
            if *self.closed.borrow() {
                return None;
            }
            match self.claim().await {
                Ok(Some(received)) => return Some(received),
                Ok(None) => {}
                Err(err) => {
                    warn!(topic = %self.topic, group = %self.group, error = %err, "claim failed");
                }
            }
            if !self.wait().await {
                return None;
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BusError> {
        let result = self
            .in_flight(ACK, delivery)?
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        if result.rows_affected() == 0 {
            return Err(not_in_flight(delivery));
        }
        Ok(())
    }

    async fn nack(
        &mut self,
        delivery: Delivery,
        redeliver_after: Duration,
    ) -> Result<(), BusError> {
        let result = self
            .in_flight(NACK, delivery)?
            .bind(redeliver_after.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        if result.rows_affected() == 0 {
            return Err(not_in_flight(delivery));
        }
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: Delivery, reason: &str) -> Result<(), BusError> {
        let attempt = i32::try_from(delivery.attempt).unwrap_or(i32::MAX);
        let mut tx = self.pool.begin().await.map_err(transport)?;
        let copied = self
            .in_flight(COPY_TO_DEAD_LETTERS, delivery)?
            .bind(attempt)
            .bind(reason)
            .execute(&mut *tx)
            .await
            .map_err(transport)?;
        let released = self
            .in_flight(ACK, delivery)?
            .execute(&mut *tx)
            .await
            .map_err(transport)?;
        if copied.rows_affected() == 0 || released.rows_affected() == 0 {
            return Err(not_in_flight(delivery));
        }
        tx.commit().await.map_err(transport)?;
        Ok(())
    }
}
