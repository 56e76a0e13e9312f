//! Spentify service entry point.

use std::sync::Arc;

use spentify_accounts::application::service::AccountService;
use spentify_app::config::AppConfig;
use spentify_app::error::AppError;
use spentify_app::pipeline::{self, Pipeline};
use spentify_app::state::AppState;
use spentify_app::{router, telemetry};
use spentify_core::clock::{Clock, SystemClock};
use spentify_core::dispatcher::Dispatcher;
use spentify_expenses::application::service::CategoryService;
use spentify_expenses::domain::repository::CategoryRepository;
use spentify_store::accounts::PgAccountRepository;
use spentify_store::bus::PgBus;
use spentify_store::categories::PgCategoryRepository;
use spentify_store::ledger::PgIdempotencyLedger;
use spentify_store::outbox::{PgOutboxSource, PgOutboxWriter};
use spentify_store::{PgTx, PgUnitOfWork, schema};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    telemetry::init();

    tracing::info!("Starting Spentify service");

    let config = AppConfig::from_env()?;

    let accounts_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.accounts_database_url)
        .await?;
    let expenses_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.expenses_database_url)
        .await?;
    let bus_pool = PgPoolOptions::new()
        .max_connections(config.topic_partitions.saturating_add(4))
        .connect(&config.bus_database_url)
        .await?;
    schema::migrate_accounts(&accounts_pool).await?;
    schema::migrate_expenses(&expenses_pool).await?;
    schema::migrate_bus(&bus_pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let accounts_uow = PgUnitOfWork::new(accounts_pool.clone());
    let expenses_uow = PgUnitOfWork::new(expenses_pool);
    let categories: Arc<dyn CategoryRepository<PgTx>> = Arc::new(PgCategoryRepository);

    // Consumer side.
    let handlers = pipeline::expenses_handlers(Arc::clone(&categories), Arc::clone(&clock))
        .map_err(|e| AppError::Config(e.to_string()))?;
    let dispatcher = Dispatcher::new(
        config.consumer_group.clone(),
        expenses_uow.clone(),
        Arc::new(PgIdempotencyLedger),
        handlers,
        Arc::clone(&clock),
    )
    .with_handler_timeout(config.handler_timeout);
    let bus = PgBus::new(bus_pool, config.topic_partitions)
        .with_lease_timeout(config.bus_lease_timeout);
    let pipeline = Pipeline::start(
        &config.pipeline(),
        &bus,
        Arc::new(PgOutboxSource::new(accounts_pool)),
        Arc::new(dispatcher),
    )
    .await?;

    // HTTP side.
    let app_state = AppState::new(
        Arc::new(AccountService::new(
            accounts_uow,
            Arc::new(PgAccountRepository),
            Arc::new(PgOutboxWriter),
            clock,
        )),
        Arc::new(CategoryService::new(expenses_uow, categories)),
    );

    let addr = config.socket_addr()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    bus.close();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "listening for ctrl-c failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
