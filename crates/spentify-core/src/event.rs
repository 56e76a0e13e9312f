//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Timestamp of event creation on the producer clock.
    pub issued_on: DateTime<Utc>,
}

/// Trait that all producer-side domain events implement.
///
/// A domain event is converted 1:1 into an
/// [`OutboxRecord`](crate::outbox::OutboxRecord) when it is written to the
/// outbox.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the logical event name (e.g. `"AccountCreated"`).
    fn event_type(&self) -> &'static str;

    /// Returns the type of the aggregate that changed (e.g. `"Account"`).
    fn aggregate_type(&self) -> &'static str;

    /// Serializes the event body.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the body cannot be encoded.
    fn payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Returns the identifier of the aggregate that changed.
    fn aggregate_id(&self) -> &str {
        &self.metadata().aggregate_id
    }

    /// Returns the producer timestamp of the event.
    fn issued_on(&self) -> DateTime<Utc> {
        self.metadata().issued_on
    }
}
