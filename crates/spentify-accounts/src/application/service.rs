//! Object-safe facade over the Accounts handlers, bound to one datastore.

use std::sync::Arc;

use async_trait::async_trait;
use spentify_core::clock::Clock;
use spentify_core::error::DomainError;
use spentify_core::outbox::OutboxWriter;
use spentify_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use super::command_handlers::{CreatedAccount, handle_create_account};
use super::query_handlers::get_account;
use crate::domain::aggregates::Account;
use crate::domain::commands::CreateAccount;
use crate::domain::repository::AccountRepository;

/// Account operations exposed to transports.
#[async_trait]
pub trait AccountOperations: Send + Sync {
    /// See [`handle_create_account`].
    async fn create_account(&self, command: CreateAccount) -> Result<CreatedAccount, DomainError>;

    /// See [`get_account`].
    async fn get_account(&self, account_id: Uuid) -> Result<Account, DomainError>;
}

/// [`AccountOperations`] over a concrete unit of work.
pub struct AccountService<U: UnitOfWork> {
    unit_of_work: U,
    accounts: Arc<dyn AccountRepository<U::Tx>>,
    outbox: Arc<dyn OutboxWriter<U::Tx>>,
    clock: Arc<dyn Clock>,
}

impl<U: UnitOfWork> AccountService<U> {
    /// Creates the service.
    #[must_use]
    pub fn new(
        unit_of_work: U,
        accounts: Arc<dyn AccountRepository<U::Tx>>,
        outbox: Arc<dyn OutboxWriter<U::Tx>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            unit_of_work,
            accounts,
            outbox,
            clock,
        }
    }
}

#[async_trait]
impl<U> AccountOperations for AccountService<U>
where
    U: UnitOfWork + 'static,
    U::Tx: 'static,
{
    async fn create_account(&self, command: CreateAccount) -> Result<CreatedAccount, DomainError> {
        handle_create_account(
            &command,
            self.clock.as_ref(),
            &self.unit_of_work,
            self.accounts.as_ref(),
            self.outbox.as_ref(),
        )
        .await
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Account, DomainError> {
        get_account(account_id, &self.unit_of_work, self.accounts.as_ref()).await
    }
}
