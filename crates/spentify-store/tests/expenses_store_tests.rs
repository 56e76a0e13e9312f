//! Integration tests for the expenses datastore adapters.
//!
//! Require a running `PostgreSQL` reachable through `DATABASE_URL`.

use std::sync::Arc;

use spentify_core::dispatcher::{DispatchOutcome, Dispatcher, SkipReason};
use spentify_core::envelope::DeliveredEvent;
use spentify_core::handler::HandlerRegistry;
use spentify_core::ledger::{IdempotencyLedger, LedgerEntry, LedgerError};
use spentify_core::unit_of_work::UnitOfWork;
use spentify_expenses::application::event_handlers::SeedDefaultCategories;
use spentify_expenses::application::query_handlers::list_categories;
use spentify_store::categories::PgCategoryRepository;
use spentify_store::ledger::PgIdempotencyLedger;
use spentify_store::{PgTx, PgUnitOfWork};
use spentify_test_support::FixedClock;
use sqlx::PgPool;
use uuid::Uuid;

const CONSUMER: &str = "expenses";

fn dispatcher(pool: PgPool) -> Dispatcher<PgUnitOfWork> {
    let clock = Arc::new(FixedClock::standard());
    let mut handlers = HandlerRegistry::<PgTx>::new();
    handlers
        .register(Arc::new(SeedDefaultCategories::<PgTx>::new(
            Arc::new(PgCategoryRepository),
            clock.clone(),
        )))
        .unwrap();
    Dispatcher::new(
        CONSUMER,
        PgUnitOfWork::new(pool),
        Arc::new(PgIdempotencyLedger),
        handlers,
        clock,
    )
}

fn account_created(account_id: Uuid) -> DeliveredEvent {
    DeliveredEvent {
        event_id: Uuid::now_v7(),
        event_type: "AccountCreated".to_owned(),
        aggregate_id: account_id.to_string(),
        payload: serde_json::json!({
            "accountId": account_id,
            "firstName": "Ada",
            "lastName": "Lovelace",
            "emailAddress": "ada@example.com",
        }),
    }
}

#[sqlx::test(migrations = "../../migrations/expenses")]
async fn test_ledger_rejects_second_mark_for_same_consumer(pool: PgPool) {
    // Arrange
    let uow = PgUnitOfWork::new(pool);
    let entry = LedgerEntry {
        consumer: CONSUMER.to_owned(),
        event_id: Uuid::new_v4(),
        processed_at: FixedClock::standard().0,
    };
    let mut tx = uow.begin().await.unwrap();
    PgIdempotencyLedger.mark_processed(&mut tx, &entry).await.unwrap();
    uow.commit(tx).await.unwrap();

    // Act
    let mut tx = uow.begin().await.unwrap();
    let seen = PgIdempotencyLedger
        .already_processed(&mut tx, CONSUMER, entry.event_id)
        .await
        .unwrap();
    let other_consumer = PgIdempotencyLedger
        .already_processed(&mut tx, "reporting", entry.event_id)
        .await
        .unwrap();
    let again = PgIdempotencyLedger.mark_processed(&mut tx, &entry).await;
    uow.rollback(tx).await.unwrap();

    // Assert
    assert!(seen);
    assert!(!other_consumer);
    match again {
        Err(LedgerError::Duplicate(id)) => assert_eq!(id, entry.event_id),
        other => panic!("expected Duplicate, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations/expenses")]
async fn test_redelivered_event_seeds_categories_once(pool: PgPool) {
    // Arrange
    let dispatcher = dispatcher(pool.clone());
    let account_id = Uuid::new_v4();
    let event = account_created(account_id);

    // Act
    let first = dispatcher.dispatch(&event).await.unwrap();
    let second = dispatcher.dispatch(&event).await.unwrap();

    // Assert
    assert_eq!(first, DispatchOutcome::Applied);
    assert_eq!(second, DispatchOutcome::Skipped(SkipReason::AlreadyProcessed));
    let categories = list_categories(account_id, &PgUnitOfWork::new(pool), &PgCategoryRepository)
        .await
        .unwrap();
    assert_eq!(categories.len(), 11);
}

#[sqlx::test(migrations = "../../migrations/expenses")]
async fn test_concurrent_deliveries_apply_exactly_once(pool: PgPool) {
    // Arrange
    let first = dispatcher(pool.clone());
    let second = dispatcher(pool.clone());
    let account_id = Uuid::new_v4();
    let event = account_created(account_id);

    // Act
    let (a, b) = tokio::join!(first.dispatch(&event), second.dispatch(&event));

    // Assert
    let mut outcomes = [a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Skipped(_)));
    assert_eq!(outcomes[0], DispatchOutcome::Applied);
    match outcomes[1] {
        DispatchOutcome::Skipped(SkipReason::AlreadyProcessed | SkipReason::LostRace) => {}
        other => panic!("expected a skipped duplicate, got {other:?}"),
    }
    let categories = list_categories(account_id, &PgUnitOfWork::new(pool), &PgCategoryRepository)
        .await
        .unwrap();
    assert_eq!(categories.len(), 11);
}
