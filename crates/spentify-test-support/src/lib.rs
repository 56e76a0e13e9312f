//! Shared test doubles for Spentify services.

mod clock;
mod handler;
mod ledger;
mod outbox;
mod publisher;
mod rng;

pub use clock::FixedClock;
pub use handler::{FailingHandler, SlowHandler};
pub use ledger::RacingLedger;
pub use outbox::FailingOutboxWriter;
pub use publisher::FlakyPublisher;
pub use rng::MockRng;
