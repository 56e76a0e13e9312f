//! Persistence port for categories.

use async_trait::async_trait;
use spentify_core::error::DomainError;
use uuid::Uuid;

use super::aggregates::Category;

/// Category storage, used inside the caller's transaction.
#[async_trait]
pub trait CategoryRepository<Tx: Send>: Send + Sync {
    /// Whether `account_id` already has a category called `name`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn exists(&self, tx: &mut Tx, account_id: Uuid, name: &str) -> Result<bool, DomainError>;

    /// Inserts a category.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conflict` if the account already has a category
    /// with the same name, or `DomainError::Infrastructure` on storage
    /// failure.
    async fn insert(&self, tx: &mut Tx, category: &Category) -> Result<(), DomainError>;

    /// Categories of `account_id`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn list(&self, tx: &mut Tx, account_id: Uuid) -> Result<Vec<Category>, DomainError>;
}
