//! Storage adapters for the Accounts context that need no external services.

pub mod in_memory;
