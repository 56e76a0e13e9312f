//! Routes for the Accounts bounded context.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use spentify_accounts::domain::aggregates::Account;
use spentify_accounts::domain::commands::CreateAccount;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /api/v1/accounts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email; must be unused.
    pub email_address: String,
}

/// Response body returned after an account is created.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAccountResponse {
    /// The new account's id.
    pub account_id: Uuid,
    /// Ids of the outbox records committed with the account.
    pub event_ids: Vec<Uuid>,
}

/// Response body for GET /api/v1/accounts/{account_id}.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    /// Account id.
    pub account_id: Uuid,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email_address: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.id,
            first_name: account.first_name,
            last_name: account.last_name,
            email_address: account.email_address.to_string(),
        }
    }
}

/// POST /api/v1/accounts
#[instrument(skip(state, request))]
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreatedAccountResponse>), ApiError> {
    let command = CreateAccount {
        correlation_id: Uuid::new_v4(),
        account_id: Uuid::new_v4(),
        first_name: request.first_name,
        last_name: request.last_name,
        email_address: request.email_address,
    };

    info!(
        correlation_id = %command.correlation_id,
        account_id = %command.account_id,
        "handling create_account command"
    );

    let created = state.accounts.create_account(command).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedAccountResponse {
            account_id: created.account_id,
            event_ids: created.event_ids,
        }),
    ))
}

/// GET /api/v1/accounts/{account_id}
#[instrument(skip(state))]
async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.accounts.get_account(account_id).await?;
    Ok(Json(account.into()))
}

/// Returns the router for the accounts context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_account))
        .route("/{account_id}", get(get_account))
}
