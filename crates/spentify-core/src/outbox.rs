//! Transactional outbox: the producer-side record of a domain event and the
//! writer that persists it next to the state change that produced it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Immutable record of one domain event destined for the message bus.
///
/// Records are inserted once and never updated. The id is the
/// deduplication key used by every downstream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    payload: serde_json::Value,
}

impl OutboxRecord {
    /// Converts a domain event into a record with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the event payload cannot be
    /// encoded.
    pub fn from_event(event: &dyn DomainEvent) -> Result<Self, DomainError> {
        let payload = event.payload()?;
        Ok(Self {
            id: Uuid::now_v7(),
            occurred_at: event.issued_on(),
            aggregate_id: event.aggregate_id().to_owned(),
            aggregate_type: event.aggregate_type().to_owned(),
            event_type: event.event_type().to_owned(),
            payload,
        })
    }

    /// Rebuilds a record that was read back from storage.
    #[must_use]
    pub fn restore(
        id: Uuid,
        occurred_at: DateTime<Utc>,
        aggregate_id: String,
        aggregate_type: String,
        event_type: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            occurred_at,
            aggregate_id,
            aggregate_type,
            event_type,
            payload,
        }
    }

    /// Globally unique record id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Producer timestamp of the event.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Identifier of the aggregate that changed.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Type of the aggregate that changed.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Logical event name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Serialized event body.
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Appends outbox records inside an already-open transaction.
///
/// Callers must use the same transaction for the domain state mutation, so
/// either both the mutation and the record commit or neither does.
#[async_trait]
pub trait OutboxWriter<Tx: Send>: Send + Sync {
    /// Persists one record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the store rejects the write. The caller must
    /// then roll back the whole transaction.
    async fn append(&self, tx: &mut Tx, record: &OutboxRecord) -> Result<(), DomainError>;

    /// Converts `event` to an [`OutboxRecord`] and persists it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded,
    /// or whatever [`append`](Self::append) returns.
    async fn record(
        &self,
        tx: &mut Tx,
        event: &dyn DomainEvent,
    ) -> Result<OutboxRecord, DomainError> {
        let record = OutboxRecord::from_event(event)?;
        self.append(tx, &record).await?;
        tracing::debug!(
            event_id = %record.id(),
            event_type = record.event_type(),
            aggregate_id = record.aggregate_id(),
            "outbox record staged"
        );
        Ok(record)
    }
}
