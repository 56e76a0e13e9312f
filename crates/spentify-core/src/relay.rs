//! Change relay: reads committed outbox records in commit order and
//! publishes them to the bus.
//!
//! The relay keeps a cursor over the outbox and only advances it past a
//! record once the bus has accepted that record's message. A crash or a
//! failed publish therefore causes republishing, never loss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusError, MessagePublisher};
use crate::envelope::{BusMessage, EnvelopeError};
use crate::error::DomainError;
use crate::outbox::OutboxRecord;

/// An outbox record with its commit-order position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedRecord {
    /// Monotonic position in commit order.
    pub position: i64,
    /// The record.
    pub record: OutboxRecord,
}

/// Reads committed outbox records.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Returns up to `limit` committed records with a position greater than
    /// `position`, in position order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the outbox cannot be read.
    async fn read_after(
        &self,
        position: i64,
        limit: usize,
    ) -> Result<Vec<PositionedRecord>, DomainError>;
}

/// Relay failures. The cursor is left on the last published record.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The outbox could not be read.
    #[error("reading the outbox failed: {0}")]
    Source(#[from] DomainError),

    /// A record could not be turned into a bus message.
    #[error("outbox record {event_id} cannot be encoded: {source}")]
    Envelope {
        /// The record id.
        event_id: Uuid,
        /// Underlying error.
        #[source]
        source: EnvelopeError,
    },

    /// The bus did not accept a message.
    #[error("publishing outbox record {event_id} failed: {source}")]
    Publish {
        /// The record id.
        event_id: Uuid,
        /// Underlying error.
        #[source]
        source: BusError,
    },
}

/// Default number of records read per pass.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause between passes that found nothing to do.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Publishes outbox records to one topic.
pub struct OutboxRelay {
    source: Arc<dyn OutboxSource>,
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    batch_size: usize,
    poll_interval: Duration,
    position: i64,
}

impl OutboxRelay {
    /// Creates a relay that starts before the first record.
    #[must_use]
    pub fn new(
        source: Arc<dyn OutboxSource>,
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            source,
            publisher,
            topic: topic.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            position: 0,
        }
    }

    /// Sets how many records one pass reads.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the idle pause between passes.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resumes after `position` instead of the start of the outbox.
    #[must_use]
    pub fn starting_after(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Position of the last record handed to the bus.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Publishes one batch of records and returns how many were published.
    ///
    /// # Errors
    ///
    /// Returns `RelayError` on the first record that could not be read,
    /// encoded or published. Records before it stay published and the
    /// cursor points at the last of them.
    pub async fn relay_once(&mut self) -> Result<usize, RelayError> {
        let batch = self.source.read_after(self.position, self.batch_size).await?;
        let mut published = 0;
        for PositionedRecord { position, record } in batch {
            let event_id = record.id();
            let message = BusMessage::try_from(&record)
                .map_err(|source| RelayError::Envelope { event_id, source })?;
            self.publisher
                .publish(&self.topic, message)
                .await
                .map_err(|source| RelayError::Publish { event_id, source })?;
            debug!(
                event_id = %event_id,
                event_type = record.event_type(),
                aggregate_id = record.aggregate_id(),
                position,
                "outbox record published"
            );
            self.position = position;
            published += 1;
        }
        Ok(published)
    }

    /// Relays until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, position = self.position, "outbox relay started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.relay_once().await {
                Ok(published) if published == self.batch_size => continue,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, position = self.position, "outbox relay pass failed");
                }
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(topic = %self.topic, position = self.position, "outbox relay stopped");
    }
}
