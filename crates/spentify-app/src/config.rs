//! Service configuration read from environment variables.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use spentify_core::retry::RetryPolicy;

use crate::error::AppError;
use crate::pipeline::PipelineSettings;

/// Default topic the relay publishes account events to.
pub const DEFAULT_OUTBOX_TOPIC: &str = "accounts.outbox.events";

/// Default consumer group, and consumer name in the ledger.
pub const DEFAULT_CONSUMER_GROUP: &str = "expenses";

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Accounts datastore (accounts and outbox tables).
    pub accounts_database_url: String,
    /// Expenses datastore (categories and ledger tables).
    pub expenses_database_url: String,
    /// Message bus datastore (topic log, group cursors and dead letters).
    pub bus_database_url: String,
    /// How long a claimed delivery stays leased to one consumer.
    pub bus_lease_timeout: Duration,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Topic for account events.
    pub outbox_topic: String,
    /// Consumer group of the expenses consumers.
    pub consumer_group: String,
    /// Partitions per topic.
    pub topic_partitions: u32,
    /// Outbox records read per relay pass.
    pub relay_batch_size: usize,
    /// Pause between relay passes that found nothing to do.
    pub relay_poll_interval: Duration,
    /// Bound on one handler invocation.
    pub handler_timeout: Duration,
    /// Redelivery policy for failed dispatches.
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = RetryPolicy::default();

        let topic_partitions: u32 = parsed(&lookup, "TOPIC_PARTITIONS", 3)?;
        if topic_partitions == 0 {
            return Err(AppError::Config(
                "TOPIC_PARTITIONS must be at least 1".into(),
            ));
        }
        let relay_batch_size: usize = parsed(&lookup, "RELAY_BATCH_SIZE", 100)?;
        if relay_batch_size == 0 {
            return Err(AppError::Config(
                "RELAY_BATCH_SIZE must be at least 1".into(),
            ));
        }
        let max_attempts = match lookup("RETRY_MAX_ATTEMPTS") {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(AppError::Config(format!(
                        "RETRY_MAX_ATTEMPTS must be a positive integer, got '{raw}'"
                    )));
                }
                Ok(n) => Some(n),
            },
        };

        Ok(Self {
            accounts_database_url: required(&lookup, "ACCOUNTS_DATABASE_URL")?,
            expenses_database_url: required(&lookup, "EXPENSES_DATABASE_URL")?,
            bus_database_url: required(&lookup, "BUS_DATABASE_URL")?,
            bus_lease_timeout: Duration::from_millis(parsed(
                &lookup,
                "BUS_LEASE_TIMEOUT_MS",
                30_000,
            )?),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(&lookup, "PORT", 3000)?,
            outbox_topic: lookup("OUTBOX_TOPIC").unwrap_or_else(|| DEFAULT_OUTBOX_TOPIC.into()),
            consumer_group: lookup("CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.into()),
            topic_partitions,
            relay_batch_size,
            relay_poll_interval: Duration::from_millis(parsed(
                &lookup,
                "RELAY_POLL_INTERVAL_MS",
                500,
            )?),
            handler_timeout: Duration::from_millis(parsed(&lookup, "HANDLER_TIMEOUT_MS", 5000)?),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(parsed(
                    &lookup,
                    "RETRY_INITIAL_BACKOFF_MS",
                    200,
                )?),
                max_backoff: Duration::from_millis(parsed(&lookup, "RETRY_MAX_BACKOFF_MS", 30_000)?),
                max_attempts,
                ..defaults
            },
        })
    }

    /// The address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Relay and consumer settings.
    #[must_use]
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            topic: self.outbox_topic.clone(),
            group: self.consumer_group.clone(),
            relay_batch_size: self.relay_batch_size,
            relay_poll_interval: self.relay_poll_interval,
            retry: self.retry.clone(),
        }
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    lookup(key).ok_or_else(|| AppError::Config(format!("{key} environment variable must be set")))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("{key} must be valid, got '{raw}': {e}"))),
    }
}
