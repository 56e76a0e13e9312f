//! Spentify Expenses bounded context.
//!
//! Owns expense categories. Learns about new accounts from `AccountCreated`
//! events and seeds each account's default categories exactly once, however
//! many times the event is delivered.

pub mod application;
pub mod domain;
pub mod infrastructure;
