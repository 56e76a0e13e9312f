//! Spentify service library: HTTP routes, configuration and the
//! outbox-to-consumer pipeline, shared by the binary and its tests.

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod telemetry;

use state::AppState;

/// Builds the full router.
// TODO: Replace CorsLayer::permissive() with configured origins once a UI is served.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest(
            "/api/v1/accounts",
            routes::accounts::router().merge(routes::categories::router()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
