//! Aggregate root abstraction.

use crate::event::DomainEvent;

/// Trait for aggregate roots that accumulate domain events while a command
/// executes.
///
/// The aggregate exclusively owns its pending events until they have been
/// written to the outbox and the surrounding transaction has committed.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> String;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);
}
