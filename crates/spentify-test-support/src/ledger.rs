//! Ledger wrappers.

use std::sync::Arc;

use async_trait::async_trait;
use spentify_core::ledger::{IdempotencyLedger, LedgerEntry, LedgerError};
use uuid::Uuid;

/// Wraps a ledger and always answers "not processed" to the up-front check,
/// the way a delivery racing an uncommitted one sees it. Inserts go to the
/// wrapped ledger, so the unique constraint still decides the winner.
pub struct RacingLedger<Tx: Send> {
    inner: Arc<dyn IdempotencyLedger<Tx>>,
}

impl<Tx: Send> RacingLedger<Tx> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn IdempotencyLedger<Tx>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<Tx: Send + 'static> IdempotencyLedger<Tx> for RacingLedger<Tx> {
    async fn already_processed(
        &self,
        _tx: &mut Tx,
        _consumer: &str,
        _event_id: Uuid,
    ) -> Result<bool, LedgerError> {
        Ok(false)
    }

    async fn mark_processed(&self, tx: &mut Tx, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.inner.mark_processed(tx, entry).await
    }
}
