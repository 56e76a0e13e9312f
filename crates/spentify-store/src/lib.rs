//! `PostgreSQL` adapters for Spentify services.
//!
//! Every adapter works on a [`PgTx`] handed out by [`PgUnitOfWork`], so a
//! repository write and its outbox record, or a handler's writes and its
//! ledger entry, share one database transaction. [`bus::PgBus`] carries
//! messages between the services through a third database.

pub mod accounts;
pub mod bus;
pub mod categories;
mod error;
pub mod ledger;
pub mod outbox;
pub mod schema;
pub mod unit_of_work;

pub use unit_of_work::{PgTx, PgUnitOfWork};
