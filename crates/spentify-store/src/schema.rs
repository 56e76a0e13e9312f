//! Embedded migrations.
//!
//! Accounts, expenses and the message bus are separate datastores, each
//! with its own migration set.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Migrations for the accounts datastore.
pub static ACCOUNTS_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/accounts");

/// Migrations for the expenses datastore.
pub static EXPENSES_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/expenses");

/// Migrations for the message bus datastore.
pub static BUS_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/bus");

/// Brings the accounts datastore up to date.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or was modified after being
/// applied.
pub async fn migrate_accounts(pool: &PgPool) -> Result<(), MigrateError> {
    ACCOUNTS_MIGRATOR.run(pool).await
}

/// Brings the expenses datastore up to date.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or was modified after being
/// applied.
pub async fn migrate_expenses(pool: &PgPool) -> Result<(), MigrateError> {
    EXPENSES_MIGRATOR.run(pool).await
}

/// Brings the message bus datastore up to date.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or was modified after being
/// applied.
pub async fn migrate_bus(pool: &PgPool) -> Result<(), MigrateError> {
    BUS_MIGRATOR.run(pool).await
}
