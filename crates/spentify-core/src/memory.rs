//! In-process transactional store.
//!
//! `InMemoryStore<S>` keeps a whole datastore state `S` behind one async
//! mutex. A transaction holds that mutex from `begin` until `commit` or
//! `rollback` and writes to a private copy of the state, so transactions are
//! serializable and a rolled-back transaction leaves no trace. Table traits
//! let one state type back the outbox, the ledger and domain tables at once.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::DomainError;
use crate::ledger::{IdempotencyLedger, LedgerEntry, LedgerError};
use crate::outbox::{OutboxRecord, OutboxWriter};
use crate::relay::{OutboxSource, PositionedRecord};
use crate::unit_of_work::UnitOfWork;

/// Shared, transactional in-memory state.
pub struct InMemoryStore<S> {
    state: Arc<Mutex<S>>,
}

impl<S> InMemoryStore<S> {
    /// Creates a store holding `state`.
    #[must_use]
    pub fn new(state: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Runs `f` against the committed state.
    pub async fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }
}

impl<S: Default> Default for InMemoryStore<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S> Clone for InMemoryStore<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// An open in-memory transaction.
pub struct InMemoryTx<S> {
    guard: OwnedMutexGuard<S>,
    working: S,
}

impl<S> InMemoryTx<S> {
    /// The transaction's view of the state, including its own writes.
    #[must_use]
    pub fn state(&self) -> &S {
        &self.working
    }

    /// Mutable access to the transaction's working copy.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.working
    }
}

#[async_trait]
impl<S> UnitOfWork for InMemoryStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Tx = InMemoryTx<S>;

    async fn begin(&self) -> Result<Self::Tx, DomainError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = S::clone(&guard);
        Ok(InMemoryTx { guard, working })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DomainError> {
        let InMemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DomainError> {
        drop(tx);
        Ok(())
    }
}

/// A state that contains an outbox table.
pub trait OutboxTable {
    /// Committed outbox rows in insertion order.
    fn outbox(&self) -> &[OutboxRecord];

    /// Mutable outbox rows.
    fn outbox_mut(&mut self) -> &mut Vec<OutboxRecord>;
}

/// A state that contains an idempotency ledger table.
pub trait LedgerTable {
    /// Ledger rows.
    fn ledger(&self) -> &[LedgerEntry];

    /// Mutable ledger rows.
    fn ledger_mut(&mut self) -> &mut Vec<LedgerEntry>;
}

/// Outbox writer for any state with an [`OutboxTable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryOutbox;

#[async_trait]
impl<S> OutboxWriter<InMemoryTx<S>> for InMemoryOutbox
where
    S: OutboxTable + Send + Sync + 'static,
{
    async fn append(
        &self,
        tx: &mut InMemoryTx<S>,
        record: &OutboxRecord,
    ) -> Result<(), DomainError> {
        let rows = tx.state_mut().outbox_mut();
        if rows.iter().any(|row| row.id() == record.id()) {
            return Err(DomainError::Conflict(format!(
                "outbox record {} already exists",
                record.id()
            )));
        }
        rows.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl<S> OutboxSource for InMemoryStore<S>
where
    S: OutboxTable + Send + Sync + 'static,
{
    async fn read_after(
        &self,
        position: i64,
        limit: usize,
    ) -> Result<Vec<PositionedRecord>, DomainError> {
        let records = self
            .read(|state| {
                state
                    .outbox()
                    .iter()
                    .zip(1_i64..)
                    .filter(|(_, row_position)| *row_position > position)
                    .take(limit)
                    .map(|(record, row_position)| PositionedRecord {
                        position: row_position,
                        record: record.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .await;
        Ok(records)
    }
}

/// Idempotency ledger for any state with a [`LedgerTable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryLedger;

fn contains(rows: &[LedgerEntry], consumer: &str, event_id: Uuid) -> bool {
    rows.iter()
        .any(|row| row.consumer == consumer && row.event_id == event_id)
}

#[async_trait]
impl<S> IdempotencyLedger<InMemoryTx<S>> for InMemoryLedger
where
    S: LedgerTable + Send + Sync + 'static,
{
    async fn already_processed(
        &self,
        tx: &mut InMemoryTx<S>,
        consumer: &str,
        event_id: Uuid,
    ) -> Result<bool, LedgerError> {
        Ok(contains(tx.state().ledger(), consumer, event_id))
    }

    async fn mark_processed(
        &self,
        tx: &mut InMemoryTx<S>,
        entry: &LedgerEntry,
    ) -> Result<(), LedgerError> {
        let rows = tx.state_mut().ledger_mut();
        if contains(rows, &entry.consumer, entry.event_id) {
            return Err(LedgerError::Duplicate(entry.event_id));
        }
        rows.push(entry.clone());
        Ok(())
    }
}
