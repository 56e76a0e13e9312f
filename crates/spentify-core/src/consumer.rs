//! Consumer loop: pulls deliveries from a subscription, dispatches them and
//! settles each one with the bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::{BusError, ReceivedMessage, Subscription};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::envelope::DeliveredEvent;
use crate::retry::RetryPolicy;
use crate::rng::DeterministicRng;
use crate::unit_of_work::UnitOfWork;

/// How one delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Dispatch reached a terminal state and the delivery was acknowledged.
    Acknowledged(DispatchOutcome),
    /// Dispatch failed and the delivery was returned for redelivery.
    Retrying {
        /// The attempt that failed.
        attempt: u32,
        /// Delay before the next attempt.
        backoff: Duration,
    },
    /// The delivery was moved to the dead-letter queue.
    DeadLettered {
        /// Why.
        reason: String,
    },
}

/// Drives one subscription through one dispatcher.
pub struct EventConsumer<U: UnitOfWork> {
    subscription: Box<dyn Subscription>,
    dispatcher: Arc<Dispatcher<U>>,
    retry: RetryPolicy,
    rng: Box<dyn DeterministicRng>,
}

impl<U> EventConsumer<U>
where
    U: UnitOfWork,
    U::Tx: 'static,
{
    /// Creates a consumer.
    #[must_use]
    pub fn new(
        subscription: Box<dyn Subscription>,
        dispatcher: Arc<Dispatcher<U>>,
        retry: RetryPolicy,
        rng: Box<dyn DeterministicRng>,
    ) -> Self {
        Self {
            subscription,
            dispatcher,
            retry,
            rng,
        }
    }

    /// Waits for one delivery and settles it. Returns `None` once the
    /// subscription has ended.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the delivery could not be settled.
    pub async fn process_one(&mut self) -> Result<Option<ConsumeOutcome>, BusError> {
        match self.subscription.next().await {
            Some(received) => self.settle(received).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consumes until the subscription ends or `shutdown` turns true. A
    /// delivery that is being dispatched when shutdown is requested is
    /// finished first.
    ///
    /// A delivery the bus refuses to settle is logged and left to the bus,
    /// which hands it out again; the loop keeps consuming.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let consumer = self.dispatcher.consumer().to_owned();
        info!(consumer = %consumer, "event consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                received = self.subscription.next() => Some(received),
            };
            match received {
                Some(Some(received)) => {
                    let delivery = received.delivery;
                    if let Err(err) = self.settle(received).await {
                        error!(
                            consumer = %consumer,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %err,
                            "failed to settle delivery"
                        );
                    }
                }
                Some(None) => break,
                None => {
                    if shutdown.has_changed().is_err() {
                        break;
                    }
                }
            }
        }
        info!(consumer = %consumer, "event consumer stopped");
    }

    async fn settle(&mut self, received: ReceivedMessage) -> Result<ConsumeOutcome, BusError> {
        let delivery = received.delivery;
        let event = match DeliveredEvent::try_from(&received.message) {
            Ok(event) => event,
            Err(err) => {
                let reason = err.to_string();
                error!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %reason,
                    "undecodable message dead-lettered"
                );
                self.subscription.dead_letter(delivery, &reason).await?;
                return Ok(ConsumeOutcome::DeadLettered { reason });
            }
        };

        match self.dispatcher.dispatch(&event).await {
            Ok(outcome) => {
                self.subscription.ack(delivery).await?;
                Ok(ConsumeOutcome::Acknowledged(outcome))
            }
            Err(err) if self.retry.exhausted(delivery.attempt) => {
                let reason = err.to_string();
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    attempt = delivery.attempt,
                    error = %reason,
                    "retries exhausted, message dead-lettered"
                );
                self.subscription.dead_letter(delivery, &reason).await?;
                Ok(ConsumeOutcome::DeadLettered { reason })
            }
            Err(err) => {
                let backoff = self.retry.backoff(delivery.attempt, self.rng.as_mut());
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    attempt = delivery.attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "dispatch failed, scheduling redelivery"
                );
                self.subscription.nack(delivery, backoff).await?;
                Ok(ConsumeOutcome::Retrying {
                    attempt: delivery.attempt,
                    backoff,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::bus::{BusSubscription, Delivery, InMemoryBus, MessagePublisher};
    use crate::clock::SystemClock;
    use crate::dispatcher::SkipReason;
    use crate::envelope::{BusMessage, EVENT_ID_HEADER, EVENT_TYPE_HEADER};
    use crate::error::DomainError;
    use crate::handler::{EventHandler, HandlerRegistry};
    use crate::ledger::LedgerEntry;
    use crate::memory::{InMemoryLedger, InMemoryStore, InMemoryTx, LedgerTable};

    const TOPIC: &str = "accounts.outbox.events";

    #[derive(Debug, Default, Clone)]
    struct State {
        ledger: Vec<LedgerEntry>,
        applied: u32,
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

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyHandler {
        failures: AtomicU32,
    }

    #[async_trait]
    impl EventHandler<Tx> for FlakyHandler {
        fn event_type(&self) -> &'static str {
            "AccountCreated"
        }

        async fn apply(&self, tx: &mut Tx, _event: &DeliveredEvent) -> Result<(), DomainError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DomainError::Infrastructure("database unavailable".into()));
            }
            tx.state_mut().applied += 1;
            Ok(())
        }
    }

    struct Midpoint;

    impl DeterministicRng for Midpoint {
        fn next_f64(&mut self) -> f64 {
            0.5
        }
    }

    fn message(event_id: &str) -> BusMessage {
        let mut headers = BTreeMap::new();
        headers.insert(EVENT_ID_HEADER.to_owned(), event_id.to_owned());
        headers.insert(EVENT_TYPE_HEADER.to_owned(), "AccountCreated".to_owned());
        BusMessage {
            key: "acc-1".to_owned(),
            headers,
            body: b"{}".to_vec(),
        }
    }

    async fn consumer(
        bus: &InMemoryBus,
        store: &InMemoryStore<State>,
        failures: u32,
        retry: RetryPolicy,
    ) -> EventConsumer<InMemoryStore<State>> {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register(Arc::new(FlakyHandler {
                failures: AtomicU32::new(failures),
            }))
            .unwrap();
        let dispatcher = Dispatcher::new(
            "expenses",
            store.clone(),
            Arc::new(InMemoryLedger),
            handlers,
            Arc::new(SystemClock),
        );
        EventConsumer::new(
            Box::new(bus.subscribe(TOPIC, "expenses").await),
            Arc::new(dispatcher),
            retry,
            Box::new(Midpoint),
        )
    }

    #[tokio::test]
    async fn test_applied_delivery_is_acknowledged() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let mut consumer = consumer(&bus, &store, 0, RetryPolicy::default()).await;
        bus.publish(TOPIC, message(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        // Act
        let outcome = consumer.process_one().await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            Some(ConsumeOutcome::Acknowledged(DispatchOutcome::Applied))
        );
        assert_eq!(bus.lag(TOPIC, "expenses").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_acknowledged_without_reapplying() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let mut consumer = consumer(&bus, &store, 0, RetryPolicy::default()).await;
        let id = Uuid::new_v4().to_string();
        bus.publish(TOPIC, message(&id)).await.unwrap();
        bus.publish(TOPIC, message(&id)).await.unwrap();

        // Act
        consumer.process_one().await.unwrap();
        let second = consumer.process_one().await.unwrap();

        // Assert
        assert_eq!(
            second,
            Some(ConsumeOutcome::Acknowledged(DispatchOutcome::Skipped(
                SkipReason::AlreadyProcessed
            )))
        );
        assert_eq!(store.read(|s| s.applied).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dispatch_is_retried_with_backoff_until_applied() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let retry = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let mut consumer = consumer(&bus, &store, 2, retry).await;
        bus.publish(TOPIC, message(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        // Act
        let first = consumer.process_one().await.unwrap();
        let second = consumer.process_one().await.unwrap();
        let third = consumer.process_one().await.unwrap();

        // Assert
        assert_eq!(
            first,
            Some(ConsumeOutcome::Retrying {
                attempt: 1,
                backoff: Duration::from_millis(200)
            })
        );
        assert_eq!(
            second,
            Some(ConsumeOutcome::Retrying {
                attempt: 2,
                backoff: Duration::from_millis(400)
            })
        );
        assert_eq!(
            third,
            Some(ConsumeOutcome::Acknowledged(DispatchOutcome::Applied))
        );
        assert_eq!(store.read(|s| s.applied).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_dead_letter_the_message() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let retry = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::default()
        };
        let mut consumer = consumer(&bus, &store, u32::MAX, retry).await;
        bus.publish(TOPIC, message(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        // Act
        consumer.process_one().await.unwrap();
        let second = consumer.process_one().await.unwrap();

        // Assert
        match second {
            Some(ConsumeOutcome::DeadLettered { reason }) => {
                assert!(reason.contains("database unavailable"));
            }
            other => panic!("expected DeadLettered, got {other:?}"),
        }
        assert_eq!(bus.dead_letters().await.len(), 1);
        assert_eq!(store.read(|s| s.ledger.len()).await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dead_lettered_immediately() {
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let mut consumer = consumer(&bus, &store, 0, RetryPolicy::default()).await;
        bus.publish(TOPIC, message("not-a-uuid")).await.unwrap();

        let outcome = consumer.process_one().await.unwrap();

        assert!(matches!(outcome, Some(ConsumeOutcome::DeadLettered { .. })));
        assert_eq!(bus.dead_letters().await[0].delivery.attempt, 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_bus_closes() {
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let consumer = consumer(&bus, &store, 0, RetryPolicy::default()).await;
        let (_tx, rx) = watch::channel(false);
        bus.publish(TOPIC, message(&Uuid::new_v4().to_string()))
            .await
            .unwrap();

        let handle = tokio::spawn(consumer.run(rx));
        while bus.lag(TOPIC, "expenses").await > 0 {
            tokio::task::yield_now().await;
        }
        bus.close().await;

        handle.await.unwrap();
        assert_eq!(store.read(|s| s.applied).await, 1);
    }

    /// Settles through the bus, but reports the first ack as failed.
    struct AckFailsOnce {
        inner: BusSubscription,
        failed: bool,
    }

    #[async_trait]
    impl Subscription for AckFailsOnce {
        async fn next(&mut self) -> Option<ReceivedMessage> {
            self.inner.next().await
        }

        async fn ack(&mut self, delivery: Delivery) -> Result<(), BusError> {
            self.inner.ack(delivery).await?;
            if self.failed {
                Ok(())
            } else {
                self.failed = true;
                Err(BusError::NotInFlight {
                    partition: delivery.partition,
                    offset: delivery.offset,
                })
            }
        }

        async fn nack(
            &mut self,
            delivery: Delivery,
            redeliver_after: Duration,
        ) -> Result<(), BusError> {
            self.inner.nack(delivery, redeliver_after).await
        }

        async fn dead_letter(&mut self, delivery: Delivery, reason: &str) -> Result<(), BusError> {
            self.inner.dead_letter(delivery, reason).await
        }
    }

    #[tokio::test]
    async fn test_run_keeps_consuming_after_settle_error() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<State>::default();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register(Arc::new(FlakyHandler {
                failures: AtomicU32::new(0),
            }))
            .unwrap();
        let dispatcher = Dispatcher::new(
            "expenses",
            store.clone(),
            Arc::new(InMemoryLedger),
            handlers,
            Arc::new(SystemClock),
        );
        let subscription = AckFailsOnce {
            inner: bus.subscribe(TOPIC, "expenses").await,
            failed: false,
        };
        let consumer = EventConsumer::new(
            Box::new(subscription),
            Arc::new(dispatcher),
            RetryPolicy::default(),
            Box::new(Midpoint),
        );
        let (shutdown, rx) = watch::channel(false);
        for _ in 0..2 {
            bus.publish(TOPIC, message(&Uuid::new_v4().to_string()))
                .await
                .unwrap();
        }

        // Act
        let handle = tokio::spawn(consumer.run(rx));
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while bus.lag(TOPIC, "expenses").await > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        // Assert
        assert!(drained.is_ok(), "consumer stopped after the failed ack");
        assert_eq!(store.read(|s| s.applied).await, 2);
    }

    /// Fails the first attempt at `fail_first`, and records the order in
    /// which events are applied.
    struct OrderRecordingHandler {
        fail_first: Uuid,
        failed: AtomicU32,
    }

    #[async_trait]
    impl EventHandler<InMemoryTx<OrderState>> for OrderRecordingHandler {
        fn event_type(&self) -> &'static str {
            "AccountCreated"
        }

        async fn apply(
            &self,
            tx: &mut InMemoryTx<OrderState>,
            event: &DeliveredEvent,
        ) -> Result<(), DomainError> {
            if event.event_id == self.fail_first && self.failed.fetch_add(1, Ordering::SeqCst) == 0
            {
                return Err(DomainError::Infrastructure("deadlock detected".into()));
            }
            tx.state_mut().applied.push(event.event_id);
            Ok(())
        }
    }

    #[derive(Debug, Default, Clone)]
    struct OrderState {
        ledger: Vec<LedgerEntry>,
        applied: Vec<Uuid>,
    }

    impl LedgerTable for OrderState {
        fn ledger(&self) -> &[LedgerEntry] {
            &self.ledger
        }

        fn ledger_mut(&mut self) -> &mut Vec<LedgerEntry> {
            &mut self.ledger
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_event_for_same_key_waits_for_failed_earlier_event() {
        // Arrange
        let bus = InMemoryBus::new(1);
        let store = InMemoryStore::<OrderState>::default();
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register(Arc::new(OrderRecordingHandler {
                fail_first: first_id,
                failed: AtomicU32::new(0),
            }))
            .unwrap();
        let dispatcher = Dispatcher::new(
            "expenses",
            store.clone(),
            Arc::new(InMemoryLedger),
            handlers,
            Arc::new(SystemClock),
        );
        let mut consumer = EventConsumer::new(
            Box::new(bus.subscribe(TOPIC, "expenses").await),
            Arc::new(dispatcher),
            RetryPolicy::default(),
            Box::new(Midpoint),
        );
        bus.publish(TOPIC, message(&first_id.to_string()))
            .await
            .unwrap();
        bus.publish(TOPIC, message(&second_id.to_string()))
            .await
            .unwrap();

        // Act
        let failed = consumer.process_one().await.unwrap();
        let applied_after_failure = store.read(|s| s.applied.clone()).await;
        let redelivered = consumer.process_one().await.unwrap();
        let next = consumer.process_one().await.unwrap();

        // Assert
        assert!(matches!(
            failed,
            Some(ConsumeOutcome::Retrying { attempt: 1, .. })
        ));
        assert!(applied_after_failure.is_empty());
        assert_eq!(
            redelivered,
            Some(ConsumeOutcome::Acknowledged(DispatchOutcome::Applied))
        );
        assert_eq!(
            next,
            Some(ConsumeOutcome::Acknowledged(DispatchOutcome::Applied))
        );
        assert_eq!(
            store.read(|s| s.applied.clone()).await,
            vec![first_id, second_id]
        );
    }
}
