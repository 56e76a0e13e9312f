//! Local transaction abstraction.
//!
//! Every write that must be atomic with another write takes the same
//! `&mut Tx`: the state mutation and its outbox record on the producer side,
//! the business side effect and its ledger entry on the consumer side.

use async_trait::async_trait;

use crate::error::DomainError;

/// Opens, commits and rolls back local transactions against one datastore.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// An open transaction.
    type Tx: Send;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx, DomainError>;

    /// Commits the transaction, making all of its writes visible at once.
    async fn commit(&self, tx: Self::Tx) -> Result<(), DomainError>;

    /// Discards every write made through the transaction.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DomainError>;
}
