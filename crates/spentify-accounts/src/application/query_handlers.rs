//! Query handlers for the Accounts context.

use spentify_core::error::DomainError;
use spentify_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::Account;
use crate::domain::repository::AccountRepository;

/// Loads one account.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no account has `account_id`,
/// or `DomainError::Infrastructure` on storage failure.
pub async fn get_account<U: UnitOfWork>(
    account_id: Uuid,
    unit_of_work: &U,
    accounts: &dyn AccountRepository<U::Tx>,
) -> Result<Account, DomainError> {
    let mut tx = unit_of_work.begin().await?;
    let found = accounts.find(&mut tx, account_id).await;
    unit_of_work.rollback(tx).await?;
    found?.ok_or_else(|| DomainError::AggregateNotFound(format!("account {account_id}")))
}
