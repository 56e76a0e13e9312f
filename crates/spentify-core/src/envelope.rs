//! Wire contract between the change relay and consumers.
//!
//! A bus message is keyed by aggregate id so every event of one aggregate
//! lands on the same partition. The outbox record id travels in the `id`
//! header and is the consumer's idempotency key.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use crate::outbox::OutboxRecord;

/// Header carrying the outbox record id.
pub const EVENT_ID_HEADER: &str = "id";

/// Header carrying the logical event name.
pub const EVENT_TYPE_HEADER: &str = "eventType";

/// Errors raised while building or reading a bus message.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A required header is absent.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// The `id` header is not a UUID.
    #[error("invalid event id '{value}': {reason}")]
    InvalidEventId {
        /// The raw header value.
        value: String,
        /// Why it could not be parsed.
        reason: String,
    },

    /// The body is not valid JSON.
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// A message as it travels over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Partition key (the aggregate id).
    pub key: String,
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// Serialized payload.
    pub body: Vec<u8>,
}

impl BusMessage {
    /// Returns a header value, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl TryFrom<&OutboxRecord> for BusMessage {
    type Error = EnvelopeError;

    fn try_from(record: &OutboxRecord) -> Result<Self, Self::Error> {
        let body = serde_json::to_vec(record.payload())
            .map_err(|e| EnvelopeError::MalformedBody(e.to_string()))?;
        let mut headers = BTreeMap::new();
        headers.insert(EVENT_ID_HEADER.to_owned(), record.id().to_string());
        headers.insert(EVENT_TYPE_HEADER.to_owned(), record.event_type().to_owned());
        Ok(Self {
            key: record.aggregate_id().to_owned(),
            headers,
            body,
        })
    }
}

/// An event as seen by the consumer after decoding the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredEvent {
    /// The outbox record id (idempotency key).
    pub event_id: Uuid,
    /// Logical event name.
    pub event_type: String,
    /// Aggregate id taken from the message key.
    pub aggregate_id: String,
    /// Decoded payload.
    pub payload: serde_json::Value,
}

impl TryFrom<&BusMessage> for DeliveredEvent {
    type Error = EnvelopeError;

    fn try_from(message: &BusMessage) -> Result<Self, Self::Error> {
        let raw_id = message
            .header(EVENT_ID_HEADER)
            .ok_or(EnvelopeError::MissingHeader(EVENT_ID_HEADER))?;
        let event_id = Uuid::parse_str(raw_id).map_err(|e| EnvelopeError::InvalidEventId {
            value: raw_id.to_owned(),
            reason: e.to_string(),
        })?;
        let event_type = message
            .header(EVENT_TYPE_HEADER)
            .ok_or(EnvelopeError::MissingHeader(EVENT_TYPE_HEADER))?
            .to_owned();
        let payload = serde_json::from_slice(&message.body)
            .map_err(|e| EnvelopeError::MalformedBody(e.to_string()))?;

        Ok(Self {
            event_id,
            event_type,
            aggregate_id: message.key.clone(),
            payload,
        })
    }
}
