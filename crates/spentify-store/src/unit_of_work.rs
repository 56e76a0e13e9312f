//! `PostgreSQL` unit of work.

use async_trait::async_trait;
use spentify_core::error::DomainError;
use spentify_core::unit_of_work::UnitOfWork;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::infrastructure;

/// An open database transaction.
pub type PgTx = Transaction<'static, Postgres>;

/// Opens transactions on a connection pool.
#[derive(Debug, Clone)]
pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    /// Creates a new `PgUnitOfWork`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, DomainError> {
        self.pool.begin().await.map_err(infrastructure)
    }

    async fn commit(&self, tx: PgTx) -> Result<(), DomainError> {
        tx.commit().await.map_err(infrastructure)
    }

    async fn rollback(&self, tx: PgTx) -> Result<(), DomainError> {
        tx.rollback().await.map_err(infrastructure)
    }
}
