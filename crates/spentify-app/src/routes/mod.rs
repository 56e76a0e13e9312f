//! Route modules.

pub mod accounts;
pub mod categories;
pub mod health;
