//! Outbox relay and expenses consumers wired over one bus.
//!
//! The relay tails the accounts outbox and publishes to the bus. One
//! consumer task per partition pulls from the bus and hands each delivery
//! to the shared expenses [`Dispatcher`]. Every task stops when the pipeline
//! is shut down.

use std::sync::Arc;
use std::time::Duration;

use spentify_core::bus::{BusError, MessageBus};
use spentify_core::clock::Clock;
use spentify_core::consumer::EventConsumer;
use spentify_core::dispatcher::Dispatcher;
use spentify_core::error::DomainError;
use spentify_core::handler::HandlerRegistry;
use spentify_core::relay::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL, OutboxRelay, OutboxSource};
use spentify_core::retry::RetryPolicy;
use spentify_core::rng::SystemRng;
use spentify_core::unit_of_work::UnitOfWork;
use spentify_expenses::application::event_handlers::SeedDefaultCategories;
use spentify_expenses::domain::repository::CategoryRepository;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::{DEFAULT_CONSUMER_GROUP, DEFAULT_OUTBOX_TOPIC};

/// Relay and consumer settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Topic the relay publishes to and the consumers read.
    pub topic: String,
    /// Consumer group.
    pub group: String,
    /// Outbox records per relay pass.
    pub relay_batch_size: usize,
    /// Relay idle poll interval.
    pub relay_poll_interval: Duration,
    /// Redelivery policy.
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_OUTBOX_TOPIC.to_owned(),
            group: DEFAULT_CONSUMER_GROUP.to_owned(),
            relay_batch_size: DEFAULT_BATCH_SIZE,
            relay_poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// The expenses service's handlers.
///
/// # Errors
///
/// Returns `DomainError::Conflict` if two handlers claim one event type.
pub fn expenses_handlers<Tx: Send + 'static>(
    categories: Arc<dyn CategoryRepository<Tx>>,
    clock: Arc<dyn Clock>,
) -> Result<HandlerRegistry<Tx>, DomainError> {
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(SeedDefaultCategories::new(categories, clock)))?;
    Ok(handlers)
}

/// Running relay and consumer tasks.
pub struct Pipeline {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Pipeline {
    /// Spawns the relay and one consumer per partition of `bus`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if a partition subscription cannot be opened.
    /// Tasks spawned before the failure are stopped.
    pub async fn start<U, B>(
        settings: &PipelineSettings,
        bus: &B,
        source: Arc<dyn OutboxSource>,
        dispatcher: Arc<Dispatcher<U>>,
    ) -> Result<Self, BusError>
    where
        U: UnitOfWork + 'static,
        U::Tx: 'static,
        B: MessageBus + Clone + 'static,
    {
        let (shutdown, signal) = watch::channel(false);
        let mut pipeline = Self {
            shutdown,
            tasks: JoinSet::new(),
        };

        let relay = OutboxRelay::new(source, Arc::new(bus.clone()), settings.topic.clone())
            .with_batch_size(settings.relay_batch_size)
            .with_poll_interval(settings.relay_poll_interval);
        pipeline.tasks.spawn(relay.run(signal.clone()));

        let partitions = bus.partitioner().partitions();
        for partition in 0..partitions {
            let subscription = match bus
                .open_subscription(&settings.topic, &settings.group, vec![partition])
                .await
            {
                Ok(subscription) => subscription,
                Err(err) => {
                    error!(partition, error = %err, "failed to subscribe");
                    pipeline.shutdown().await;
                    return Err(err);
                }
            };
            let consumer = EventConsumer::new(
                subscription,
                Arc::clone(&dispatcher),
                settings.retry.clone(),
                Box::new(SystemRng),
            );
            pipeline.tasks.spawn(consumer.run(signal.clone()));
        }

        info!(
            topic = %settings.topic,
            group = %settings.group,
            partitions,
            "pipeline started"
        );
        Ok(pipeline)
    }

    /// Signals every task to stop and waits for them.
    pub async fn shutdown(mut self) {
        // Receivers only go away when their task has already ended.
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "pipeline task panicked");
            }
        }
        info!("pipeline stopped");
    }
}
