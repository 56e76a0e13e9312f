//! Storage adapters for the Expenses context that need no external services.

pub mod in_memory;
