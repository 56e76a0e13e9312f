//! In-memory category storage on top of [`InMemoryStore`].
//!
//! [`InMemoryStore`]: spentify_core::memory::InMemoryStore

use async_trait::async_trait;
use spentify_core::error::DomainError;
use spentify_core::ledger::LedgerEntry;
use spentify_core::memory::{InMemoryTx, LedgerTable};
use uuid::Uuid;

use crate::domain::aggregates::Category;
use crate::domain::repository::CategoryRepository;

/// A state that contains a categories table.
pub trait CategoryTable {
    /// Stored categories in insertion order.
    fn categories(&self) -> &[Category];

    /// Mutable stored categories.
    fn categories_mut(&mut self) -> &mut Vec<Category>;
}

/// The whole expenses datastore: categories plus the idempotency ledger.
#[derive(Debug, Default, Clone)]
pub struct ExpensesState {
    /// Categories table.
    pub categories: Vec<Category>,
    /// Ledger of processed events.
    pub ledger: Vec<LedgerEntry>,
}

impl CategoryTable for ExpensesState {
    fn categories(&self) -> &[Category] {
        &self.categories
    }

    fn categories_mut(&mut self) -> &mut Vec<Category> {
        &mut self.categories
    }
}

impl LedgerTable for ExpensesState {
    fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut Vec<LedgerEntry> {
        &mut self.ledger
    }
}

/// [`CategoryRepository`] for any state with a [`CategoryTable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryCategoryRepository;

fn has(rows: &[Category], account_id: Uuid, name: &str) -> bool {
    rows.iter()
        .any(|c| c.account_id() == account_id && c.name() == name)
}

#[async_trait]
impl<S> CategoryRepository<InMemoryTx<S>> for InMemoryCategoryRepository
where
    S: CategoryTable + Send + Sync + 'static,
{
    async fn exists(
        &self,
        tx: &mut InMemoryTx<S>,
        account_id: Uuid,
        name: &str,
    ) -> Result<bool, DomainError> {
        Ok(has(tx.state().categories(), account_id, name))
    }

    async fn insert(&self, tx: &mut InMemoryTx<S>, category: &Category) -> Result<(), DomainError> {
        let rows = tx.state_mut().categories_mut();
        if has(rows, category.account_id(), category.name()) {
            return Err(DomainError::Conflict(format!(
                "category '{}' already exists for account {}",
                category.name(),
                category.account_id()
            )));
        }
        rows.push(category.clone());
        Ok(())
    }

    async fn list(
        &self,
        tx: &mut InMemoryTx<S>,
        account_id: Uuid,
    ) -> Result<Vec<Category>, DomainError> {
        let mut categories: Vec<Category> = tx
            .state()
            .categories()
            .iter()
            .filter(|c| c.account_id() == account_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(categories)
    }
}
