//! Aggregate roots for the Accounts context.

use std::fmt;

use spentify_core::aggregate::AggregateRoot;
use spentify_core::clock::Clock;
use spentify_core::error::DomainError;
use spentify_core::event::EventMetadata;
use uuid::Uuid;

use super::events::{AccountCreated, AccountEvent, AccountEventKind};

/// Longest accepted name or email address, in characters.
pub const MAX_FIELD_LENGTH: usize = 100;

/// A syntactically valid email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Validates and trims `raw`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` unless `raw` has the shape
    /// `local@domain.tld` with a 2 to 6 letter top-level domain.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let value = raw.trim();
        let invalid = || DomainError::Validation(format!("emailAddress '{value}' is not valid"));

        if value.is_empty() {
            return Err(DomainError::Validation(
                "emailAddress must not be blank".into(),
            ));
        }
        if value.chars().count() > MAX_FIELD_LENGTH {
            return Err(DomainError::Validation(format!(
                "emailAddress must be at most {MAX_FIELD_LENGTH} characters"
            )));
        }

        let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
        let local_ok = !local.is_empty()
            && local
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._%+-_".contains(c));
        let labels: Vec<&str> = domain.split('.').collect();
        let (tld, hosts) = labels.split_last().ok_or_else(invalid)?;
        let hosts_ok = !hosts.is_empty()
            && hosts.iter().all(|label| {
                !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });
        let tld_ok = (2..=6).contains(&tld.len()) && tld.chars().all(|c| c.is_ascii_alphabetic());

        if local_ok && hosts_ok && tld_ok {
            Ok(Self(value.to_owned()))
        } else {
            Err(invalid())
        }
    }

    /// The address as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_name(field: &str, raw: &str) -> Result<String, DomainError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be blank")));
    }
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(DomainError::Validation(format!(
            "{field} must be at most {MAX_FIELD_LENGTH} characters"
        )));
    }
    Ok(value.to_owned())
}

/// The aggregate root for a user account.
#[derive(Debug)]
pub struct Account {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email_address: EmailAddress,
    uncommitted_events: Vec<AccountEvent>,
}

impl Account {
    /// Opens a new account and records `AccountCreated`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a name is blank or too long.
    pub fn open(
        id: Uuid,
        first_name: &str,
        last_name: &str,
        email_address: EmailAddress,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let first_name = validate_name("firstName", first_name)?;
        let last_name = validate_name("lastName", last_name)?;

        let event = AccountEvent {
            metadata: EventMetadata {
                aggregate_id: id.to_string(),
                correlation_id,
                issued_on: clock.now(),
            },
            kind: AccountEventKind::AccountCreated(AccountCreated {
                account_id: id,
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                email_address: email_address.to_string(),
            }),
        };

        Ok(Self {
            id,
            first_name,
            last_name,
            email_address,
            uncommitted_events: vec![event],
        })
    }

    /// Rebuilds an account read from storage. It has no pending events.
    #[must_use]
    pub fn restore(
        id: Uuid,
        first_name: String,
        last_name: String,
        email_address: EmailAddress,
    ) -> Self {
        Self {
            id,
            first_name,
            last_name,
            email_address,
            uncommitted_events: Vec::new(),
        }
    }
}

impl AggregateRoot for Account {
    type Event = AccountEvent;

    fn aggregate_id(&self) -> String {
        self.id.to_string()
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}
