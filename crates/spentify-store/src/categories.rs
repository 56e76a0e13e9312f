//! `expense_category` table adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spentify_core::error::DomainError;
use spentify_expenses::domain::aggregates::Category;
use spentify_expenses::domain::repository::CategoryRepository;
use uuid::Uuid;

use crate::error::infrastructure;
use crate::unit_of_work::PgTx;

/// [`CategoryRepository`] backed by `PostgreSQL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgCategoryRepository;

#[async_trait]
impl CategoryRepository<PgTx> for PgCategoryRepository {
    async fn exists(&self, tx: &mut PgTx, account_id: Uuid, name: &str) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM expense_category WHERE account_id = $1 AND name = $2)",
        )
        .bind(account_id)
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(infrastructure)
    }

    async fn insert(&self, tx: &mut PgTx, category: &Category) -> Result<(), DomainError> {
        // ON CONFLICT keeps the transaction usable when a concurrent
        // delivery inserted the same name first.
        let inserted = sqlx::query(
            "INSERT INTO expense_category (id, account_id, name, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id, name) DO NOTHING",
        )
        .bind(category.id())
        .bind(category.account_id())
        .bind(category.name())
        .bind(category.created_at())
        .execute(&mut **tx)
        .await
        .map_err(infrastructure)?
        .rows_affected();

        if inserted == 0 {
            return Err(DomainError::Conflict(format!(
                "category '{}' already exists for account {}",
                category.name(),
                category.account_id()
            )));
        }
        Ok(())
    }

    async fn list(&self, tx: &mut PgTx, account_id: Uuid) -> Result<Vec<Category>, DomainError> {
        let rows: Vec<(Uuid, Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, account_id, name, created_at
             FROM expense_category
             WHERE account_id = $1
             ORDER BY name",
        )
        .bind(account_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(infrastructure)?;

        rows.into_iter()
            .map(|(id, account_id, name, created_at)| {
                Category::new(id, account_id, &name, created_at)
            })
            .collect()
    }
}
