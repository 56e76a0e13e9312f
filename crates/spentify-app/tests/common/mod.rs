//! Shared test helpers for end-to-end tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use spentify_accounts::application::service::AccountService;
use spentify_accounts::infrastructure::in_memory::{AccountsState, InMemoryAccountRepository};
use spentify_app::pipeline::{PipelineSettings, expenses_handlers};
use spentify_app::router;
use spentify_app::state::AppState;
use spentify_core::bus::InMemoryBus;
use spentify_core::clock::Clock;
use spentify_core::consumer::EventConsumer;
use spentify_core::dispatcher::Dispatcher;
use spentify_core::ledger::IdempotencyLedger;
use spentify_core::memory::{InMemoryLedger, InMemoryOutbox, InMemoryStore, InMemoryTx};
use spentify_core::outbox::OutboxWriter;
use spentify_core::relay::OutboxRelay;
use spentify_core::retry::RetryPolicy;
use spentify_expenses::application::service::CategoryService;
use spentify_expenses::infrastructure::in_memory::{ExpensesState, InMemoryCategoryRepository};
use spentify_test_support::{FixedClock, MockRng};
use tower::ServiceExt;
use uuid::Uuid;

pub const TOPIC: &str = "accounts.outbox.events";
pub const GROUP: &str = "expenses";

pub type AccountsStore = InMemoryStore<AccountsState>;
pub type ExpensesStore = InMemoryStore<ExpensesState>;
pub type ExpensesTx = InMemoryTx<ExpensesState>;

/// Both datastores, the bus between them and a fixed clock.
pub struct TestSystem {
    pub accounts: AccountsStore,
    pub expenses: ExpensesStore,
    pub bus: InMemoryBus,
    pub clock: Arc<dyn Clock>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self {
            accounts: AccountsStore::default(),
            expenses: ExpensesStore::default(),
            bus: InMemoryBus::new(3),
            clock: Arc::new(FixedClock::standard()),
        }
    }

    /// Router backed by the in-memory stores.
    pub fn app(&self) -> Router {
        self.app_with_outbox(Arc::new(InMemoryOutbox))
    }

    /// Router whose account service writes through `outbox`.
    pub fn app_with_outbox(
        &self,
        outbox: Arc<dyn OutboxWriter<InMemoryTx<AccountsState>>>,
    ) -> Router {
        let state = AppState::new(
            Arc::new(AccountService::new(
                self.accounts.clone(),
                Arc::new(InMemoryAccountRepository),
                outbox,
                Arc::clone(&self.clock),
            )),
            Arc::new(CategoryService::new(
                self.expenses.clone(),
                Arc::new(InMemoryCategoryRepository),
            )),
        );
        router(state)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher<ExpensesStore>> {
        self.dispatcher_with_ledger(Arc::new(InMemoryLedger))
    }

    pub fn dispatcher_with_ledger(
        &self,
        ledger: Arc<dyn IdempotencyLedger<ExpensesTx>>,
    ) -> Arc<Dispatcher<ExpensesStore>> {
        let handlers = expenses_handlers::<ExpensesTx>(
            Arc::new(InMemoryCategoryRepository),
            Arc::clone(&self.clock),
        )
        .unwrap();
        Arc::new(Dispatcher::new(
            GROUP,
            self.expenses.clone(),
            ledger,
            handlers,
            Arc::clone(&self.clock),
        ))
    }

    /// A relay from the accounts outbox to the bus, starting at the
    /// beginning of the outbox.
    pub fn relay(&self) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.accounts.clone()),
            Arc::new(self.bus.clone()),
            TOPIC,
        )
    }

    /// A consumer on every partition with fast, jitter-free retries.
    pub async fn consumer(
        &self,
        dispatcher: Arc<Dispatcher<ExpensesStore>>,
        retry: RetryPolicy,
    ) -> EventConsumer<ExpensesStore> {
        let subscription = self.bus.subscribe(TOPIC, GROUP).await;
        EventConsumer::new(Box::new(subscription), dispatcher, retry, Box::new(MockRng))
    }

    pub async fn category_names(&self, account_id: Uuid) -> Vec<String> {
        self.expenses
            .read(|s| {
                s.categories
                    .iter()
                    .filter(|c| c.account_id() == account_id)
                    .map(|c| c.name().to_owned())
                    .collect()
            })
            .await
    }

    pub async fn ledger_len(&self) -> usize {
        self.expenses.read(|s| s.ledger.len()).await
    }

    pub async fn outbox_len(&self) -> usize {
        self.accounts.read(|s| s.outbox.len()).await
    }
}

/// Retry policy that redelivers after a millisecond.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        jitter: 0.0,
        ..RetryPolicy::default()
    }
}

/// Pipeline settings with a short relay poll interval.
pub fn fast_pipeline() -> PipelineSettings {
    PipelineSettings {
        relay_poll_interval: Duration::from_millis(10),
        retry: fast_retry(),
        ..PipelineSettings::default()
    }
}

/// Creates an account through the API and returns its id.
pub async fn create_account(app: Router, email: &str) -> Uuid {
    let (status, json) = post_json(
        app,
        "/api/v1/accounts",
        &serde_json::json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "emailAddress": email,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {json}");
    json["accountId"].as_str().unwrap().parse().unwrap()
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}
