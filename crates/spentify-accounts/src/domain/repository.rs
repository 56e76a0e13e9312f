//! Persistence port for accounts.

use async_trait::async_trait;
use spentify_core::error::DomainError;
use uuid::Uuid;

use super::aggregates::{Account, EmailAddress};

/// Account storage, used inside the caller's transaction.
#[async_trait]
pub trait AccountRepository<Tx: Send>: Send + Sync {
    /// Whether any account already uses `email`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn email_in_use(&self, tx: &mut Tx, email: &EmailAddress) -> Result<bool, DomainError>;

    /// Inserts a new account.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conflict` if the id or email is already taken,
    /// or `DomainError::Infrastructure` on storage failure.
    async fn insert(&self, tx: &mut Tx, account: &Account) -> Result<(), DomainError>;

    /// Loads an account by id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn find(&self, tx: &mut Tx, account_id: Uuid) -> Result<Option<Account>, DomainError>;
}
