// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::application::bot_service::{BotLifecycleService, SpawnRequest};
use crate::application::error::OrchestratorError;
use crate::domain::bot::{BotId, OwnerId};

/// Header carrying the authenticated user id, set by the upstream auth layer
pub const OWNER_HEADER: &str = "x-clawster-user";
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub struct AppState {
    pub service: Arc<dyn BotLifecycleService>,
    pub start_time: Instant,
}

pub fn app(service: Arc<dyn BotLifecycleService>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/v1/bots", get(list_bots).post(spawn_bot))
        .route("/v1/bots/{id}", get(get_bot).delete(terminate_bot))
        .route("/v1/bots/{id}/restart", post(restart_bot))
        .route("/v1/bots/{id}/attestation", get(attestation))
        .route("/v1/bots/{id}/logs", get(logs))
        .route("/v1/billing/usage", get(usage_summary))
        .route("/v1/billing/webhook", post(billing_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Orchestrator(OrchestratorError),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
        OrchestratorError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Provisioning(_)
        | OrchestratorError::Encryption(_)
        | OrchestratorError::ExternalNotFound(_)
        | OrchestratorError::TerminationFailed(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Not authenticated".to_string(),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Orchestrator(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "Request failed");
                }
                (status, err.kind(), err.to_string())
            }
        };

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

/// Authenticated owner, taken from [`OWNER_HEADER`]
pub struct Owner(pub OwnerId);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(OwnerId::new(value)))
            .ok_or(ApiError::Unauthorized)
    }
}

fn parse_bot_id(id: &str) -> Result<BotId, ApiError> {
    BotId::from_string(id).map_err(|_| ApiError::Orchestrator(OrchestratorError::NotFound(id.to_string())))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn list_bots(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let bots = state.service.list(&owner).await?;
    Ok(Json(json!({ "bots": bots })))
}

async fn spawn_bot(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(request): Json<SpawnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spawned = state.service.spawn(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(spawned)))
}

async fn get_bot(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state.service.get_status(&owner, parse_bot_id(&id)?).await?;
    Ok(Json(bot))
}

async fn terminate_bot(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state.service.terminate(&owner, parse_bot_id(&id)?).await?;
    Ok(Json(bot))
}

async fn restart_bot(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state.service.restart(&owner, parse_bot_id(&id)?).await?;
    Ok(Json(bot))
}

async fn attestation(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.service.attestation(&owner, parse_bot_id(&id)?).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

async fn logs(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.service.logs(&owner, parse_bot_id(&id)?, query.tail).await?;
    Ok(Json(logs))
}

async fn usage_summary(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.service.usage_summary(&owner).await?;
    Ok(Json(summary))
}

async fn billing_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            warn!("Billing webhook without signature header");
            ApiError::BadRequest("missing Stripe-Signature header".to_string())
        })?;

    let outcome = state.service.billing_webhook(&body, signature).await?;
    Ok(Json(json!({ "received": true, "outcome": outcome.as_str() })))
}
