//! `eventlog` table adapter.

use async_trait::async_trait;
use spentify_core::ledger::{IdempotencyLedger, LedgerEntry, LedgerError};
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::unit_of_work::PgTx;

/// Idempotency ledger over the `eventlog` table.
///
/// The primary key on `(consumer, event_id)` decides races: a second
/// transaction inserting the same key blocks until the first finishes and
/// then fails with a unique violation, reported as
/// [`LedgerError::Duplicate`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PgIdempotencyLedger;

#[async_trait]
impl IdempotencyLedger<PgTx> for PgIdempotencyLedger {
    async fn already_processed(
        &self,
        tx: &mut PgTx,
        consumer: &str,
        event_id: Uuid,
    ) -> Result<bool, LedgerError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM eventlog WHERE consumer = $1 AND event_id = $2)",
        )
        .bind(consumer)
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    async fn mark_processed(&self, tx: &mut PgTx, entry: &LedgerEntry) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO eventlog (consumer, event_id, processed_on) VALUES ($1, $2, $3)")
            .bind(&entry.consumer)
            .bind(entry.event_id)
            .bind(entry.processed_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LedgerError::Duplicate(entry.event_id)
                } else {
                    LedgerError::Storage(e.to_string())
                }
            })?;
        Ok(())
    }
}
