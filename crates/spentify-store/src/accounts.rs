//! `accounts` table adapter.

use async_trait::async_trait;
use spentify_accounts::domain::aggregates::{Account, EmailAddress};
use spentify_accounts::domain::repository::AccountRepository;
use spentify_core::error::DomainError;
use uuid::Uuid;

use crate::error::{infrastructure, is_unique_violation, violated_constraint};
use crate::unit_of_work::PgTx;

const EMAIL_CONSTRAINT: &str = "accounts_email_address_key";

/// [`AccountRepository`] backed by `PostgreSQL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgAccountRepository;

#[async_trait]
impl AccountRepository<PgTx> for PgAccountRepository {
    async fn email_in_use(&self, tx: &mut PgTx, email: &EmailAddress) -> Result<bool, DomainError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE email_address = $1)",
        )
        .bind(email.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(infrastructure)
    }

    async fn insert(&self, tx: &mut PgTx, account: &Account) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO accounts (id, first_name, last_name, email_address)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(account.id)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.email_address.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if !is_unique_violation(&e) {
                return infrastructure(e);
            }
            if violated_constraint(&e) == Some(EMAIL_CONSTRAINT) {
                DomainError::Conflict(format!(
                    "emailAddress '{}' already exists",
                    account.email_address
                ))
            } else {
                DomainError::Conflict(format!("account {} already exists", account.id))
            }
        })?;
        Ok(())
    }

    async fn find(&self, tx: &mut PgTx, account_id: Uuid) -> Result<Option<Account>, DomainError> {
        let row: Option<(Uuid, String, String, String)> = sqlx::query_as(
            "SELECT id, first_name, last_name, email_address FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(infrastructure)?;

        row.map(|(id, first_name, last_name, email)| {
            Ok(Account::restore(
                id,
                first_name,
                last_name,
                EmailAddress::parse(&email)?,
            ))
        })
        .transpose()
    }
}
