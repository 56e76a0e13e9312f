//! Entities for the Expenses context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spentify_core::error::DomainError;
use uuid::Uuid;

/// Longest accepted category name, in characters.
pub const MAX_CATEGORY_NAME_LENGTH: usize = 100;

/// Categories every new account starts with.
pub const DEFAULT_CATEGORIES: [&str; 11] = [
    "Food",
    "Transport",
    "Medical",
    "Education",
    "Travel",
    "Clothing",
    "Fun",
    "Personal",
    "Loan",
    "Business",
    "Other",
];

/// An expense category owned by one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    id: Uuid,
    account_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl Category {
    /// Creates a category with a trimmed name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name is blank or too long.
    pub fn new(
        id: Uuid,
        account_id: Uuid,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Validation(
                "category name must not be blank".into(),
            ));
        }
        if name.chars().count() > MAX_CATEGORY_NAME_LENGTH {
            return Err(DomainError::Validation(format!(
                "category name must be at most {MAX_CATEGORY_NAME_LENGTH} characters"
            )));
        }
        Ok(Self {
            id,
            account_id,
            name: name.to_owned(),
            created_at,
        })
    }

    /// Category id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning account.
    #[must_use]
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    /// Category name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
