//! Command handlers for the Expenses context.

use spentify_core::clock::Clock;
use spentify_core::error::DomainError;
use spentify_core::unit_of_work::UnitOfWork;
use tracing::warn;
use uuid::Uuid;

use crate::domain::aggregates::Category;
use crate::domain::commands::AddCategory;
use crate::domain::repository::CategoryRepository;

/// Adds a category inside an already-open transaction.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a bad name, `DomainError::Conflict`
/// if the account already has a category with that name, or the
/// repository's storage error.
pub async fn add_category<Tx: Send>(
    tx: &mut Tx,
    command: &AddCategory,
    clock: &dyn Clock,
    categories: &dyn CategoryRepository<Tx>,
) -> Result<Category, DomainError> {
    let category = Category::new(Uuid::new_v4(), command.account_id, &command.name, clock.now())?;
    if categories
        .exists(tx, category.account_id(), category.name())
        .await?
    {
        return Err(DomainError::Conflict(format!(
            "category '{}' already exists for account {}",
            category.name(),
            category.account_id()
        )));
    }
    categories.insert(tx, &category).await?;
    Ok(category)
}

/// Handles the `AddCategory` command in its own transaction.
///
/// # Errors
///
/// Returns whatever [`add_category`] or the unit of work reports. Nothing is
/// committed on error.
pub async fn handle_add_category<U: UnitOfWork>(
    command: &AddCategory,
    clock: &dyn Clock,
    unit_of_work: &U,
    categories: &dyn CategoryRepository<U::Tx>,
) -> Result<Category, DomainError> {
    let mut tx = unit_of_work.begin().await?;
    match add_category(&mut tx, command, clock, categories).await {
        Ok(category) => {
            unit_of_work.commit(tx).await?;
            Ok(category)
        }
        Err(err) => {
            if let Err(rollback_err) = unit_of_work.rollback(tx).await {
                warn!(error = %rollback_err, "rollback after failed category insert failed");
            }
            Err(err)
        }
    }
}
