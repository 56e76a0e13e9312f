//! In-memory account storage on top of [`InMemoryStore`].
//!
//! [`InMemoryStore`]: spentify_core::memory::InMemoryStore

use async_trait::async_trait;
use spentify_core::error::DomainError;
use spentify_core::memory::{InMemoryTx, OutboxTable};
use spentify_core::outbox::OutboxRecord;
use uuid::Uuid;

use crate::domain::aggregates::{Account, EmailAddress};
use crate::domain::repository::AccountRepository;

/// One stored account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    /// Account id.
    pub id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email; unique.
    pub email_address: String,
}

/// A state that contains an accounts table.
pub trait AccountTable {
    /// Stored accounts.
    fn accounts(&self) -> &[AccountRow];

    /// Mutable stored accounts.
    fn accounts_mut(&mut self) -> &mut Vec<AccountRow>;
}

/// The whole accounts datastore: accounts plus the outbox.
#[derive(Debug, Default, Clone)]
pub struct AccountsState {
    /// Accounts table.
    pub accounts: Vec<AccountRow>,
    /// Outbox table.
    pub outbox: Vec<OutboxRecord>,
}

impl AccountTable for AccountsState {
    fn accounts(&self) -> &[AccountRow] {
        &self.accounts
    }

    fn accounts_mut(&mut self) -> &mut Vec<AccountRow> {
        &mut self.accounts
    }
}

impl OutboxTable for AccountsState {
    fn outbox(&self) -> &[OutboxRecord] {
        &self.outbox
    }

    fn outbox_mut(&mut self) -> &mut Vec<OutboxRecord> {
        &mut self.outbox
    }
}

/// [`AccountRepository`] for any state with an [`AccountTable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryAccountRepository;

#[async_trait]
impl<S> AccountRepository<InMemoryTx<S>> for InMemoryAccountRepository
where
    S: AccountTable + Send + Sync + 'static,
{
    async fn email_in_use(
        &self,
        tx: &mut InMemoryTx<S>,
        email: &EmailAddress,
    ) -> Result<bool, DomainError> {
        Ok(tx
            .state()
            .accounts()
            .iter()
            .any(|row| row.email_address == email.as_str()))
    }

    async fn insert(&self, tx: &mut InMemoryTx<S>, account: &Account) -> Result<(), DomainError> {
        let rows = tx.state_mut().accounts_mut();
        if rows.iter().any(|row| row.id == account.id) {
            return Err(DomainError::Conflict(format!(
                "account {} already exists",
                account.id
            )));
        }
        if rows
            .iter()
            .any(|row| row.email_address == account.email_address.as_str())
        {
            return Err(DomainError::Conflict(format!(
                "emailAddress '{}' already exists",
                account.email_address
            )));
        }
        rows.push(AccountRow {
            id: account.id,
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            email_address: account.email_address.to_string(),
        });
        Ok(())
    }

    async fn find(
        &self,
        tx: &mut InMemoryTx<S>,
        account_id: Uuid,
    ) -> Result<Option<Account>, DomainError> {
        let Some(row) = tx
            .state()
            .accounts()
            .iter()
            .find(|row| row.id == account_id)
            .cloned()
        else {
            return Ok(None);
        };
        let email = EmailAddress::parse(&row.email_address)?;
        Ok(Some(Account::restore(
            row.id,
            row.first_name,
            row.last_name,
            email,
        )))
    }
}
