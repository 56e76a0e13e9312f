//! Domain model for the Expenses context.

pub mod aggregates;
pub mod commands;
pub mod messages;
pub mod repository;
