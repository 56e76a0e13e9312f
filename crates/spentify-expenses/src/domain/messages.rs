//! Inbound event contracts published by other services.

use serde::Deserialize;
use uuid::Uuid;

/// Event type of [`AccountCreatedMessage`].
pub const ACCOUNT_CREATED: &str = "AccountCreated";

/// Body of an `AccountCreated` event from the Accounts service.
///
/// Only the fields this context uses are declared; unknown fields are
/// ignored so the producer can add fields without breaking consumers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreatedMessage {
    /// The new account's id.
    pub account_id: Uuid,
    /// Contact email, kept for log context.
    #[serde(default)]
    pub email_address: Option<String>,
}
