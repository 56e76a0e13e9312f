//! Outbox writer that refuses every write.

use async_trait::async_trait;
use spentify_core::error::DomainError;
use spentify_core::outbox::{OutboxRecord, OutboxWriter};

/// Fails every append, simulating an outbox insert that aborts the
/// surrounding transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingOutboxWriter;

impl FailingOutboxWriter {
    /// Creates the writer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<Tx: Send + 'static> OutboxWriter<Tx> for FailingOutboxWriter {
    async fn append(&self, _tx: &mut Tx, _record: &OutboxRecord) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("outbox insert failed".into()))
    }
}
