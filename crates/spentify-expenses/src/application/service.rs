//! Object-safe facade over the Expenses read side, bound to one datastore.

use std::sync::Arc;

use async_trait::async_trait;
use spentify_core::error::DomainError;
use spentify_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use super::query_handlers::list_categories;
use crate::domain::aggregates::Category;
use crate::domain::repository::CategoryRepository;

/// Category queries exposed to transports.
#[async_trait]
pub trait CategoryQueries: Send + Sync {
    /// See [`list_categories`].
    async fn list_categories(&self, account_id: Uuid) -> Result<Vec<Category>, DomainError>;
}

/// [`CategoryQueries`] over a concrete unit of work.
pub struct CategoryService<U: UnitOfWork> {
    unit_of_work: U,
    categories: Arc<dyn CategoryRepository<U::Tx>>,
}

impl<U: UnitOfWork> CategoryService<U> {
    /// Creates the service.
    #[must_use]
    pub fn new(unit_of_work: U, categories: Arc<dyn CategoryRepository<U::Tx>>) -> Self {
        Self {
            unit_of_work,
            categories,
        }
    }
}

#[async_trait]
impl<U> CategoryQueries for CategoryService<U>
where
    U: UnitOfWork + 'static,
    U::Tx: 'static,
{
    async fn list_categories(&self, account_id: Uuid) -> Result<Vec<Category>, DomainError> {
        list_categories(account_id, &self.unit_of_work, self.categories.as_ref()).await
    }
}
