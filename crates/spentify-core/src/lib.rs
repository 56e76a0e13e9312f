//! Spentify Core: shared abstractions for cross-service event delivery.
//!
//! The producer side writes domain events to a transactional outbox in the
//! same local transaction as the state change that produced them. The
//! consumer side applies each delivered event at most once by recording its
//! id in an idempotency ledger inside the transaction of the side effect.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod ledger;
pub mod memory;
pub mod outbox;
pub mod relay;
pub mod retry;
pub mod rng;
pub mod unit_of_work;
