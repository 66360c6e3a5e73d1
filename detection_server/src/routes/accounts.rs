use crate::{
    accounts::{bearer_token, AccountError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use detection_wire::{LoginRequest, ProfileUpdate, RegisterRequest, StatusReply};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum AccountRouteError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("{0}")]
    Account(#[from] AccountError),
    #[error("Account task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for AccountRouteError {
    fn into_response(self) -> Response {
        let status = match &self {
            AccountRouteError::InvalidJson
            | AccountRouteError::Account(
                AccountError::MissingFields
                | AccountError::UsernameExists
                | AccountError::UsernameTaken,
            ) => StatusCode::BAD_REQUEST,
            AccountRouteError::Account(
                AccountError::InvalidCredentials | AccountError::NotAuthenticated,
            ) => StatusCode::UNAUTHORIZED,
            AccountRouteError::Account(AccountError::Hash(_) | AccountError::Token(_))
            | AccountRouteError::Task(_) => {
                tracing::error!("Account request failed: {}", self);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(StatusReply::error(self.to_string())),
                )
                    .into_response();
            }
        };
        (status, Json(StatusReply::fail(self.to_string()))).into_response()
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AccountRouteError> {
    serde_json::from_slice(body).map_err(|_| AccountRouteError::InvalidJson)
}

/// Replies to methods a route does not serve.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(StatusReply::fail("Method not allowed")),
    )
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<StatusReply>, AccountRouteError> {
    let request: RegisterRequest = parse_body(&body)?;
    let username = request.username.unwrap_or_default();
    let password = request.password.unwrap_or_default();
    let email = request.email.unwrap_or_default();

    let accounts = state.accounts.clone();
    tokio::task::spawn_blocking(move || accounts.register(&username, &password, &email))
        .await??;

    Ok(Json(StatusReply::success_with("User registered successfully")))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<StatusReply>, AccountRouteError> {
    let request: LoginRequest = parse_body(&body)?;
    let username = request.username.unwrap_or_default();
    let password = request.password.unwrap_or_default();

    let accounts = state.accounts.clone();
    let account_id =
        tokio::task::spawn_blocking(move || accounts.authenticate(&username, &password))
            .await??;
    let token = state.tokens.issue(account_id)?;

    // Login refreshes the media history.
    let history = state.history.clone();
    match tokio::task::spawn_blocking(move || history.sync()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Media sync after login failed: {}", e),
        Err(e) => tracing::warn!("Media sync task failed: {}", e),
    }

    Ok(Json(
        StatusReply::success_with("Login successful").with_token(token),
    ))
}

/// Always succeeds. A valid bearer token is revoked.
#[instrument(skip_all)]
pub async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Json<StatusReply> {
    if let Some(token) = bearer_token(&headers) {
        state.tokens.revoke(token);
    }
    Json(StatusReply::success_with("Logout successful"))
}

#[instrument(skip_all)]
pub async fn delete_account(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<StatusReply>, AccountRouteError> {
    let account_id = state.tokens.authenticate(&headers)?;
    state.accounts.delete(account_id)?;
    if let Some(token) = bearer_token(&headers) {
        state.tokens.revoke(token);
    }

    Ok(Json(StatusReply::success_with("Account deleted successfully")))
}

#[instrument(skip_all)]
pub async fn get_profile(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<StatusReply>, AccountRouteError> {
    let account_id = state.tokens.authenticate(&headers)?;
    let profile = state.accounts.profile(account_id)?;

    Ok(Json(StatusReply::with_profile(profile)))
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StatusReply>, AccountRouteError> {
    let account_id = state.tokens.authenticate(&headers)?;
    let update: ProfileUpdate = parse_body(&body)?;

    let accounts = state.accounts.clone();
    tokio::task::spawn_blocking(move || accounts.update_profile(account_id, &update)).await??;

    Ok(Json(StatusReply::success_with("Profile updated successfully")))
}
