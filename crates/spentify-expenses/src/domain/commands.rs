//! Commands for the Expenses context.

use uuid::Uuid;

/// Command to add a category to an account.
#[derive(Debug, Clone)]
pub struct AddCategory {
    /// The owning account.
    pub account_id: Uuid,
    /// Category name, unique per account.
    pub name: String,
}
