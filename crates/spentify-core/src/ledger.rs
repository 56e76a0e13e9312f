//! Idempotency ledger: the durable set of event ids a consumer has applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One processed event, as recorded by one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Consumer that applied the event.
    pub consumer: String,
    /// The outbox record id being acknowledged.
    pub event_id: Uuid,
    /// When the event was applied.
    pub processed_at: DateTime<Utc>,
}

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event id is already in this consumer's ledger. Recoverable: the
    /// event has been handled by someone else.
    #[error("event {0} has already been processed")]
    Duplicate(Uuid),

    /// The ledger could not be read or written.
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Per-consumer record of applied events.
///
/// `(consumer, event_id)` is unique in storage. That constraint, not
/// application logic, makes [`mark_processed`](Self::mark_processed) the
/// concurrency-safe deduplication primitive: of two concurrent calls with the
/// same id, one succeeds and the other gets [`LedgerError::Duplicate`].
#[async_trait]
pub trait IdempotencyLedger<Tx: Send>: Send + Sync {
    /// Whether `event_id` has already been applied by `consumer`.
    async fn already_processed(
        &self,
        tx: &mut Tx,
        consumer: &str,
        event_id: Uuid,
    ) -> Result<bool, LedgerError>;

    /// Inserts `entry`; fails with [`LedgerError::Duplicate`] if it exists.
    async fn mark_processed(&self, tx: &mut Tx, entry: &LedgerEntry) -> Result<(), LedgerError>;
}
