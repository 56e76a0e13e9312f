//! Command handlers for the Accounts context.
//!
//! Each handler opens one local transaction, writes the aggregate's state
//! and every event it produced to the outbox through that transaction, and
//! commits. Any failure rolls the whole transaction back, so a state change
//! is never visible without its outbox record or the other way round.

use spentify_core::aggregate::AggregateRoot;
use spentify_core::clock::Clock;
use spentify_core::error::DomainError;
use spentify_core::outbox::{OutboxRecord, OutboxWriter};
use spentify_core::unit_of_work::UnitOfWork;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Account, EmailAddress};
use crate::domain::commands::CreateAccount;
use crate::domain::repository::AccountRepository;

/// Result of a successful `CreateAccount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAccount {
    /// The new account's id.
    pub account_id: Uuid,
    /// Ids of the outbox records written with it.
    pub event_ids: Vec<Uuid>,
}

async fn write_account<Tx: Send>(
    tx: &mut Tx,
    account: &Account,
    accounts: &dyn AccountRepository<Tx>,
    outbox: &dyn OutboxWriter<Tx>,
) -> Result<Vec<OutboxRecord>, DomainError> {
    if accounts.email_in_use(tx, &account.email_address).await? {
        return Err(DomainError::Conflict(format!(
            "emailAddress '{}' already exists",
            account.email_address
        )));
    }
    accounts.insert(tx, account).await?;

    let mut records = Vec::with_capacity(account.uncommitted_events().len());
    for event in account.uncommitted_events() {
        records.push(outbox.record(tx, event).await?);
    }
    Ok(records)
}

/// Handles the `CreateAccount` command: validates input, inserts the
/// account and its `AccountCreated` outbox record in one transaction.
///
/// # Errors
///
/// Returns `DomainError::Validation` for bad input,
/// `DomainError::Conflict` if the email address is taken, or whatever the
/// repository, outbox writer or unit of work reports. Nothing is committed
/// on error.
pub async fn handle_create_account<U: UnitOfWork>(
    command: &CreateAccount,
    clock: &dyn Clock,
    unit_of_work: &U,
    accounts: &dyn AccountRepository<U::Tx>,
    outbox: &dyn OutboxWriter<U::Tx>,
) -> Result<CreatedAccount, DomainError> {
    let email = EmailAddress::parse(&command.email_address)?;
    let mut account = Account::open(
        command.account_id,
        &command.first_name,
        &command.last_name,
        email,
        command.correlation_id,
        clock,
    )?;

    let mut tx = unit_of_work.begin().await?;
    let records = match write_account(&mut tx, &account, accounts, outbox).await {
        Ok(records) => records,
        Err(err) => {
            if let Err(rollback_err) = unit_of_work.rollback(tx).await {
                warn!(error = %rollback_err, "rollback after failed account creation failed");
            }
            return Err(err);
        }
    };
    unit_of_work.commit(tx).await?;
    account.clear_uncommitted_events();

    let event_ids: Vec<Uuid> = records.iter().map(OutboxRecord::id).collect();
    info!(
        correlation_id = %command.correlation_id,
        account_id = %account.id,
        event_count = event_ids.len(),
        "account created"
    );
    Ok(CreatedAccount {
        account_id: account.id,
        event_ids,
    })
}
