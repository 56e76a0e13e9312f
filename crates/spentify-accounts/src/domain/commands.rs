//! Commands for the Accounts context.

use uuid::Uuid;

/// Command to open a new account.
#[derive(Debug, Clone)]
pub struct CreateAccount {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Identifier to assign to the new account.
    pub account_id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email; unique across accounts.
    pub email_address: String,
}
