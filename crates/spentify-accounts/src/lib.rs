//! Spentify Accounts bounded context.
//!
//! Owns user accounts. Creating an account writes the account row and its
//! `AccountCreated` outbox record in one local transaction; other services
//! learn about new accounts only through the relayed outbox.

pub mod application;
pub mod domain;
pub mod infrastructure;
