//! Application services for the Accounts context.

pub mod command_handlers;
pub mod query_handlers;
pub mod service;
