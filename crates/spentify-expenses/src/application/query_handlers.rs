//! Query handlers for the Expenses context.

use spentify_core::error::DomainError;
use spentify_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::Category;
use crate::domain::repository::CategoryRepository;

/// Lists an account's categories ordered by name. An account the service
/// has not heard of yet has none.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` on storage failure.
pub async fn list_categories<U: UnitOfWork>(
    account_id: Uuid,
    unit_of_work: &U,
    categories: &dyn CategoryRepository<U::Tx>,
) -> Result<Vec<Category>, DomainError> {
    let mut tx = unit_of_work.begin().await?;
    let listed = categories.list(&mut tx, account_id).await;
    unit_of_work.rollback(tx).await?;
    listed
}

#[cfg(test)]
mod tests {
    use spentify_core::memory::InMemoryStore;
    use spentify_test_support::FixedClock;

    use super::*;
    use crate::application::command_handlers::handle_add_category;
    use crate::domain::commands::AddCategory;
    use crate::infrastructure::in_memory::{ExpensesState, InMemoryCategoryRepository};

    #[tokio::test]
    async fn test_list_categories_is_ordered_by_name_and_scoped_to_account() {
        // Arrange
        let clock = FixedClock::standard();
        let store = InMemoryStore::<ExpensesState>::default();
        let account_id = Uuid::new_v4();
        for (owner, name) in [
            (account_id, "Travel"),
            (Uuid::new_v4(), "Books"),
            (account_id, "Food"),
        ] {
            let command = AddCategory {
                account_id: owner,
                name: name.to_owned(),
            };
            handle_add_category(&command, &clock, &store, &InMemoryCategoryRepository)
                .await
                .unwrap();
        }

        // Act
        let listed = list_categories(account_id, &store, &InMemoryCategoryRepository)
            .await
            .unwrap();

        // Assert
        let names: Vec<_> = listed.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Food", "Travel"]);
    }

    #[tokio::test]
    async fn test_list_categories_for_unknown_account_is_empty() {
        let store = InMemoryStore::<ExpensesState>::default();

        let listed = list_categories(Uuid::new_v4(), &store, &InMemoryCategoryRepository)
            .await
            .unwrap();

        assert!(listed.is_empty());
    }
}
