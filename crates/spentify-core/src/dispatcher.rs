//! Idempotent event dispatch.
//!
//! For every delivered event the dispatcher opens one local transaction,
//! checks the consumer's ledger, runs the registered handler and records the
//! event id, then commits. The side effect and the ledger entry commit
//! together or not at all, so an event is applied at most once per consumer
//! no matter how often the bus delivers it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::envelope::DeliveredEvent;
use crate::error::DomainError;
use crate::handler::HandlerRegistry;
use crate::ledger::{IdempotencyLedger, LedgerEntry, LedgerError};
use crate::unit_of_work::UnitOfWork;

/// Default upper bound on one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Why an event was acknowledged without running its handler to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The ledger already had the event id when the transaction began.
    AlreadyProcessed,
    /// Another delivery of the same event committed first; this transaction
    /// was rolled back when its ledger insert collided.
    LostRace,
    /// No handler is registered for the event type.
    NoHandler,
}

/// Terminal result of dispatching one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and its effects committed with the ledger entry.
    Applied,
    /// Nothing was committed. The delivery is still safe to acknowledge.
    Skipped(SkipReason),
}

/// Dispatch failures. Nothing was committed; the delivery must be retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler returned an error.
    #[error("handler for {event_type} failed on event {event_id}: {source}")]
    Handler {
        /// The event id.
        event_id: Uuid,
        /// The event type.
        event_type: String,
        /// Underlying error.
        #[source]
        source: DomainError,
    },

    /// The handler did not finish in time.
    #[error("handler for event {event_id} exceeded {timeout:?}")]
    Timeout {
        /// The event id.
        event_id: Uuid,
        /// The configured limit.
        timeout: Duration,
    },

    /// The ledger could not be read or written.
    #[error("ledger access for event {event_id} failed: {reason}")]
    Ledger {
        /// The event id.
        event_id: Uuid,
        /// Underlying error text.
        reason: String,
    },

    /// The transaction could not be opened or committed.
    #[error("transaction for event {event_id} failed: {source}")]
    Transaction {
        /// The event id.
        event_id: Uuid,
        /// Underlying error.
        #[source]
        source: DomainError,
    },
}

/// Applies delivered events for one named consumer.
pub struct Dispatcher<U: UnitOfWork> {
    consumer: String,
    unit_of_work: U,
    ledger: Arc<dyn IdempotencyLedger<U::Tx>>,
    handlers: HandlerRegistry<U::Tx>,
    clock: Arc<dyn Clock>,
    handler_timeout: Duration,
}

impl<U> Dispatcher<U>
where
    U: UnitOfWork,
    U::Tx: 'static,
{
    /// Creates a dispatcher for `consumer`.
    #[must_use]
    pub fn new(
        consumer: impl Into<String>,
        unit_of_work: U,
        ledger: Arc<dyn IdempotencyLedger<U::Tx>>,
        handlers: HandlerRegistry<U::Tx>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            consumer: consumer.into(),
            unit_of_work,
            ledger,
            handlers,
            clock,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Sets the upper bound on one handler invocation.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// The consumer name ledger entries are recorded under.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Applies `event` at most once.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if the handler failed or timed out, or the
    /// ledger or transaction could not be used. The transaction has been
    /// rolled back in every error case.
    #[instrument(
        skip(self, event),
        fields(
            consumer = %self.consumer,
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
        )
    )]
    pub async fn dispatch(&self, event: &DeliveredEvent) -> Result<DispatchOutcome, DispatchError> {
        let event_id = event.event_id;
        let mut tx = self
            .unit_of_work
            .begin()
            .await
            .map_err(|source| DispatchError::Transaction { event_id, source })?;

        let seen = self
            .ledger
            .already_processed(&mut tx, &self.consumer, event_id)
            .await;
        match seen {
            Ok(false) => {}
            Ok(true) => {
                self.discard(tx).await;
                info!("duplicate delivery skipped");
                return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyProcessed));
            }
            Err(err) => {
                self.discard(tx).await;
                return Err(DispatchError::Ledger {
                    event_id,
                    reason: err.to_string(),
                });
            }
        }

        let Some(handler) = self.handlers.get(&event.event_type) else {
            self.discard(tx).await;
            debug!("no handler registered, skipping");
            return Ok(DispatchOutcome::Skipped(SkipReason::NoHandler));
        };

        let applied = tokio::time::timeout(self.handler_timeout, handler.apply(&mut tx, event)).await;
        match applied {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                self.discard(tx).await;
                warn!(error = %source, "handler failed");
                return Err(DispatchError::Handler {
                    event_id,
                    event_type: event.event_type.clone(),
                    source,
                });
            }
            Err(_elapsed) => {
                self.discard(tx).await;
                warn!(timeout = ?self.handler_timeout, "handler timed out");
                return Err(DispatchError::Timeout {
                    event_id,
                    timeout: self.handler_timeout,
                });
            }
        }

        let entry = LedgerEntry {
            consumer: self.consumer.clone(),
            event_id,
            processed_at: self.clock.now(),
        };
        let marked = self.ledger.mark_processed(&mut tx, &entry).await;
        match marked {
            Ok(()) => {}
            Err(LedgerError::Duplicate(_)) => {
                self.discard(tx).await;
                info!("concurrent delivery committed first, effects rolled back");
                return Ok(DispatchOutcome::Skipped(SkipReason::LostRace));
            }
            Err(LedgerError::Storage(reason)) => {
                self.discard(tx).await;
                return Err(DispatchError::Ledger { event_id, reason });
            }
        }

        self.unit_of_work
            .commit(tx)
            .await
            .map_err(|source| DispatchError::Transaction { event_id, source })?;
        info!("event applied");
        Ok(DispatchOutcome::Applied)
    }

    async fn discard(&self, tx: U::Tx) {
        if let Err(err) = self.unit_of_work.rollback(tx).await {
            warn!(error = %err, "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::handler::EventHandler;
    use crate::memory::{InMemoryLedger, InMemoryStore, InMemoryTx, LedgerTable};

    #[derive(Debug, Default, Clone)]
    struct State {
        ledger: Vec<LedgerEntry>,
        applied: Vec<Uuid>,
    }

    impl LedgerTable for State {
        fn ledger(&self) -> &[LedgerEntry] {
            &self.ledger
        }

        fn ledger_mut(&mut self) -> &mut Vec<LedgerEntry> {
            &mut self.ledger
        }
    }

    type Tx = InMemoryTx<State>;

    /// Records the event id, then fails if asked to.
    struct RecordingHandler {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl EventHandler<Tx> for RecordingHandler {
        fn event_type(&self) -> &'static str {
            "AccountCreated"
        }

        async fn apply(&self, tx: &mut Tx, event: &DeliveredEvent) -> Result<(), DomainError> {
            tx.state_mut().applied.push(event.event_id);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(DomainError::Infrastructure("downstream unavailable".into()));
            }
            Ok(())
        }
    }

    /// Always reports "not yet processed" so two deliveries both reach the
    /// ledger insert.
    struct BlindLedger;

    #[async_trait]
    impl IdempotencyLedger<Tx> for BlindLedger {
        async fn already_processed(
            &self,
            _tx: &mut Tx,
            _consumer: &str,
            _event_id: Uuid,
        ) -> Result<bool, LedgerError> {
            Ok(false)
        }

        async fn mark_processed(&self, tx: &mut Tx, entry: &LedgerEntry) -> Result<(), LedgerError> {
            InMemoryLedger.mark_processed(tx, entry).await
        }
    }

    fn dispatcher(
        store: &InMemoryStore<State>,
        ledger: Arc<dyn IdempotencyLedger<Tx>>,
        handler: Option<RecordingHandler>,
    ) -> Dispatcher<InMemoryStore<State>> {
        let mut handlers = HandlerRegistry::new();
        if let Some(handler) = handler {
            handlers.register(Arc::new(handler)).unwrap();
        }
        Dispatcher::new("expenses", store.clone(), ledger, handlers, Arc::new(SystemClock))
    }

    fn ok_handler() -> Option<RecordingHandler> {
        Some(RecordingHandler {
            fail: false,
            delay: Duration::ZERO,
        })
    }

    fn event(event_type: &str) -> DeliveredEvent {
        DeliveredEvent {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            aggregate_id: "acc-1".to_owned(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_first_delivery_applies_and_records() {
        // Arrange
        let store = InMemoryStore::<State>::default();
        let dispatcher = dispatcher(&store, Arc::new(InMemoryLedger), ok_handler());
        let event = event("AccountCreated");

        // Act
        let outcome = dispatcher.dispatch(&event).await.unwrap();

        // Assert
        assert_eq!(outcome, DispatchOutcome::Applied);
        let (applied, ledger) = store.read(|s| (s.applied.clone(), s.ledger.clone())).await;
        assert_eq!(applied, vec![event.event_id]);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].consumer, "expenses");
        assert_eq!(ledger[0].event_id, event.event_id);
        assert!(ledger[0].processed_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_redelivery_is_skipped() {
        // Arrange
        let store = InMemoryStore::<State>::default();
        let dispatcher = dispatcher(&store, Arc::new(InMemoryLedger), ok_handler());
        let event = event("AccountCreated");
        dispatcher.dispatch(&event).await.unwrap();

        // Act
        let outcome = dispatcher.dispatch(&event).await.unwrap();

        // Assert
        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::AlreadyProcessed));
        assert_eq!(store.read(|s| s.applied.len()).await, 1);
    }

    #[tokio::test]
    async fn test_handler_failure_rolls_back_effects_and_ledger() {
        // Arrange
        let store = InMemoryStore::<State>::default();
        let failing = dispatcher(
            &store,
            Arc::new(InMemoryLedger),
            Some(RecordingHandler {
                fail: true,
                delay: Duration::ZERO,
            }),
        );
        let event = event("AccountCreated");

        // Act
        let result = failing.dispatch(&event).await;

        // Assert
        match result {
            Err(DispatchError::Handler { event_id, .. }) => assert_eq!(event_id, event.event_id),
            other => panic!("expected Handler, got {other:?}"),
        }
        assert_eq!(store.read(|s| (s.applied.len(), s.ledger.len())).await, (0, 0));

        let healthy = dispatcher(&store, Arc::new(InMemoryLedger), ok_handler());
        assert_eq!(healthy.dispatch(&event).await.unwrap(), DispatchOutcome::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_and_rolls_back() {
        let store = InMemoryStore::<State>::default();
        let dispatcher = dispatcher(
            &store,
            Arc::new(InMemoryLedger),
            Some(RecordingHandler {
                fail: false,
                delay: Duration::from_secs(60),
            }),
        )
        .with_handler_timeout(Duration::from_secs(1));

        let result = dispatcher.dispatch(&event("AccountCreated")).await;

        assert!(matches!(result, Err(DispatchError::Timeout { .. })));
        assert_eq!(store.read(|s| (s.applied.len(), s.ledger.len())).await, (0, 0));
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_skipped_without_ledger_entry() {
        let store = InMemoryStore::<State>::default();
        let dispatcher = dispatcher(&store, Arc::new(InMemoryLedger), ok_handler());

        let outcome = dispatcher.dispatch(&event("AccountClosed")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::NoHandler));
        assert_eq!(store.read(|s| s.ledger.len()).await, 0);
    }

    #[tokio::test]
    async fn test_ledger_collision_rolls_back_the_loser() {
        // Arrange
        let store = InMemoryStore::<State>::default();
        let dispatcher = dispatcher(&store, Arc::new(BlindLedger), ok_handler());
        let event = event("AccountCreated");
        dispatcher.dispatch(&event).await.unwrap();

        // Act
        let outcome = dispatcher.dispatch(&event).await.unwrap();

        // Assert
        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::LostRace));
        assert_eq!(store.read(|s| (s.applied.len(), s.ledger.len())).await, (1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_apply_once() {
        // Arrange
        let store = InMemoryStore::<State>::default();
        let dispatcher = Arc::new(dispatcher(&store, Arc::new(InMemoryLedger), ok_handler()));
        let event = event("AccountCreated");

        // Act
        let (a, b) = tokio::join!(dispatcher.dispatch(&event), dispatcher.dispatch(&event));

        // Assert
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Skipped(_)));
        assert_eq!(outcomes[0], DispatchOutcome::Applied);
        assert!(matches!(outcomes[1], DispatchOutcome::Skipped(_)));
        assert_eq!(store.read(|s| s.applied.len()).await, 1);
    }
}
