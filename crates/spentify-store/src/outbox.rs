//! Outbox table adapters: the in-transaction writer and the relay's reader.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spentify_core::error::DomainError;
use spentify_core::outbox::{OutboxRecord, OutboxWriter};
use spentify_core::relay::{OutboxSource, PositionedRecord};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{infrastructure, is_unique_violation};
use crate::unit_of_work::PgTx;

/// Advisory lock key taken by every outbox writer until commit.
const OUTBOX_LOCK_KEY: i64 = 0x0075_7462_6f78;

/// Inserts outbox records in the caller's transaction.
///
/// Positions come from an identity column, which is assigned at insert
/// time. The writer holds a transaction-scoped advisory lock so that no
/// transaction can commit a lower position after a higher one became
/// visible to the relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgOutboxWriter;

#[async_trait]
impl OutboxWriter<PgTx> for PgOutboxWriter {
    async fn append(&self, tx: &mut PgTx, record: &OutboxRecord) -> Result<(), DomainError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(OUTBOX_LOCK_KEY)
            .execute(&mut **tx)
            .await
            .map_err(infrastructure)?;

        sqlx::query(
            r#"INSERT INTO outboxevent (id, "timestamp", aggregateid, aggregatetype, "type", payload)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(record.id())
        .bind(record.occurred_at())
        .bind(record.aggregate_id())
        .bind(record.aggregate_type())
        .bind(record.event_type())
        .bind(record.payload())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DomainError::Conflict(format!("outbox record {} already exists", record.id()))
            } else {
                infrastructure(e)
            }
        })?;
        Ok(())
    }
}

type OutboxRow = (
    i64,
    Uuid,
    DateTime<Utc>,
    String,
    String,
    String,
    serde_json::Value,
);

/// Reads committed outbox rows for the relay.
#[derive(Debug, Clone)]
pub struct PgOutboxSource {
    pool: PgPool,
}

impl PgOutboxSource {
    /// Creates a new `PgOutboxSource`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxSource for PgOutboxSource {
    async fn read_after(
        &self,
        position: i64,
        limit: usize,
    ) -> Result<Vec<PositionedRecord>, DomainError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"SELECT position, id, "timestamp", aggregateid, aggregatetype, "type", payload
               FROM outboxevent
               WHERE position > $1
               ORDER BY position
               LIMIT $2"#,
        )
        .bind(position)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(rows
            .into_iter()
            .map(
                |(position, id, occurred_at, aggregate_id, aggregate_type, event_type, payload)| {
                    PositionedRecord {
                        position,
                        record: OutboxRecord::restore(
                            id,
                            occurred_at,
                            aggregate_id,
                            aggregate_type,
                            event_type,
                            payload,
                        ),
                    }
                },
            )
            .collect())
    }
}
