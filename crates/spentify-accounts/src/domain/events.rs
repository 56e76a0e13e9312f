//! Domain events for the Accounts context.

use serde::{Deserialize, Serialize};
use spentify_core::error::DomainError;
use spentify_core::event::{DomainEvent, EventMetadata};
use uuid::Uuid;

/// Aggregate type recorded on every account outbox record.
pub const ACCOUNT_AGGREGATE_TYPE: &str = "Account";

/// Event type of [`AccountCreated`].
pub const ACCOUNT_CREATED: &str = "AccountCreated";

/// Emitted when an account is opened. Serialized as the outbox payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreated {
    /// The account identifier.
    pub account_id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email_address: String,
}

/// Event payload variants for the Accounts context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEventKind {
    /// An account has been opened.
    AccountCreated(AccountCreated),
}

/// Domain event envelope for the Accounts context.
#[derive(Debug, Clone)]
pub struct AccountEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: AccountEventKind,
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match &self.kind {
            AccountEventKind::AccountCreated(_) => ACCOUNT_CREATED,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        ACCOUNT_AGGREGATE_TYPE
    }

    fn payload(&self) -> Result<serde_json::Value, DomainError> {
        match &self.kind {
            AccountEventKind::AccountCreated(created) => Ok(serde_json::to_value(created)?),
        }
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
