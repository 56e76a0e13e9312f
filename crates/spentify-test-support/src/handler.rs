//! Event handlers that work with any transaction type.

use std::time::Duration;

use async_trait::async_trait;
use spentify_core::envelope::DeliveredEvent;
use spentify_core::error::DomainError;
use spentify_core::handler::EventHandler;

/// A handler that always fails with an infrastructure error.
#[derive(Debug)]
pub struct FailingHandler(pub &'static str);

#[async_trait]
impl<Tx: Send + 'static> EventHandler<Tx> for FailingHandler {
    fn event_type(&self) -> &'static str {
        self.0
    }

    async fn apply(&self, _tx: &mut Tx, _event: &DeliveredEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}

/// A handler that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowHandler {
    event_type: &'static str,
    delay: Duration,
}

impl SlowHandler {
    /// Creates a handler for `event_type` that takes `delay` per call.
    #[must_use]
    pub fn new(event_type: &'static str, delay: Duration) -> Self {
        Self { event_type, delay }
    }
}

#[async_trait]
impl<Tx: Send + 'static> EventHandler<Tx> for SlowHandler {
    fn event_type(&self) -> &'static str {
        self.event_type
    }

    async fn apply(&self, _tx: &mut Tx, _event: &DeliveredEvent) -> Result<(), DomainError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
