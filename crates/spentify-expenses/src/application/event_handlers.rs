//! Handlers for events consumed from other services.

use std::sync::Arc;

use async_trait::async_trait;
use spentify_core::clock::Clock;
use spentify_core::envelope::DeliveredEvent;
use spentify_core::error::DomainError;
use spentify_core::handler::EventHandler;
use tracing::debug;

use super::command_handlers::add_category;
use crate::domain::aggregates::DEFAULT_CATEGORIES;
use crate::domain::commands::AddCategory;
use crate::domain::messages::{ACCOUNT_CREATED, AccountCreatedMessage};
use crate::domain::repository::CategoryRepository;

/// Seeds the default categories of a newly created account.
///
/// Runs inside the dispatcher's transaction, so the categories commit
/// together with the ledger entry for the event. A default name the account
/// already has is left alone.
pub struct SeedDefaultCategories<Tx: Send> {
    categories: Arc<dyn CategoryRepository<Tx>>,
    clock: Arc<dyn Clock>,
}

impl<Tx: Send> SeedDefaultCategories<Tx> {
    /// Creates the handler.
    #[must_use]
    pub fn new(categories: Arc<dyn CategoryRepository<Tx>>, clock: Arc<dyn Clock>) -> Self {
        Self { categories, clock }
    }
}

#[async_trait]
impl<Tx: Send + 'static> EventHandler<Tx> for SeedDefaultCategories<Tx> {
    fn event_type(&self) -> &'static str {
        ACCOUNT_CREATED
    }

    async fn apply(&self, tx: &mut Tx, event: &DeliveredEvent) -> Result<(), DomainError> {
        let message: AccountCreatedMessage = serde_json::from_value(event.payload.clone())?;

        let mut added = 0_usize;
        for name in DEFAULT_CATEGORIES {
            let command = AddCategory {
                account_id: message.account_id,
                name: name.to_owned(),
            };
            match add_category(&mut *tx, &command, self.clock.as_ref(), self.categories.as_ref()).await {
                Ok(_) => added += 1,
                Err(DomainError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }

        debug!(
            account_id = %message.account_id,
            added,
            "default categories seeded"
        );
        Ok(())
    }
}
