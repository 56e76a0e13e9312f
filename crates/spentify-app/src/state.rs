//! Shared application state.

use std::sync::Arc;

use spentify_accounts::application::service::AccountOperations;
use spentify_expenses::application::service::CategoryQueries;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Accounts write and read side.
    pub accounts: Arc<dyn AccountOperations>,
    /// Expenses read side.
    pub categories: Arc<dyn CategoryQueries>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountOperations>, categories: Arc<dyn CategoryQueries>) -> Self {
        Self {
            accounts,
            categories,
        }
    }
}
