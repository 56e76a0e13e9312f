//! Expenses read side: an account's categories.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use spentify_expenses::domain::aggregates::Category;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// One category.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResponse {
    /// Category id.
    pub id: Uuid,
    /// Category name.
    pub name: String,
    /// When the category was added.
    pub created_at: DateTime<Utc>,
}

impl From<&Category> for CategoryResponse {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id(),
            name: category.name().to_owned(),
            created_at: category.created_at(),
        }
    }
}

/// GET /api/v1/accounts/{account_id}/categories
#[instrument(skip(state))]
async fn list_categories(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<CategoryResponse>>, ApiError> {
    let categories = state.categories.list_categories(account_id).await?;
    Ok(Json(categories.iter().map(CategoryResponse::from).collect()))
}

/// Returns the router for category queries.
pub fn router() -> Router<AppState> {
    Router::new().route("/{account_id}/categories", get(list_categories))
}
