//! Business side-effect handlers and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::DeliveredEvent;
use crate::error::DomainError;

/// Applies the business effect of one event type inside the dispatcher's
/// transaction.
///
/// Handlers must do all of their writes through `tx`; a handler that writes
/// anywhere else cannot be rolled back together with the ledger entry. The
/// dispatcher guarantees at most one successful call per event id, so
/// handlers do not re-check idempotency.
#[async_trait]
pub trait EventHandler<Tx: Send>: Send + Sync {
    /// The event type this handler is registered for.
    fn event_type(&self) -> &'static str;

    /// Applies the event.
    ///
    /// # Errors
    ///
    /// Any error aborts the transaction and the message is redelivered.
    async fn apply(&self, tx: &mut Tx, event: &DeliveredEvent) -> Result<(), DomainError>;
}

/// Maps event type tags to handlers.
pub struct HandlerRegistry<Tx: Send> {
    handlers: HashMap<&'static str, Arc<dyn EventHandler<Tx>>>,
}

impl<Tx: Send + 'static> HandlerRegistry<Tx> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` under its event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conflict` if a handler is already registered for
    /// the same event type.
    pub fn register(&mut self, handler: Arc<dyn EventHandler<Tx>>) -> Result<(), DomainError> {
        let event_type = handler.event_type();
        if self.handlers.contains_key(event_type) {
            return Err(DomainError::Conflict(format!(
                "a handler for '{event_type}' is already registered"
            )));
        }
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    /// Looks up the handler for `event_type`.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler<Tx>>> {
        self.handlers.get(event_type)
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl<Tx: Send + 'static> Default for HandlerRegistry<Tx> {
    fn default() -> Self {
        Self::new()
    }
}
