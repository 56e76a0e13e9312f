//! sqlx error mapping.

use spentify_core::error::DomainError;

pub(crate) fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

pub(crate) fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    err.as_database_error()
        .and_then(|db_err| db_err.constraint())
}
