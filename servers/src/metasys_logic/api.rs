//! # Control API
//!
//! HTTP surface over the subscription registry and the stream supervisor.
//! Success bodies carry `message`; failures carry `detail` (and `kind` for
//! engine errors).

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_ingest::IngestError;
use lib_ingest::core::{DispatchHealth, SubscribeOutcome, UnsubscribeOutcome};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::metasys_logic::state::AppState;

/// # Application Error
///
/// Errors surfaced by the handlers, mapped onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    /// The request conflicts with current state (already/not subscribed).
    BadRequest(String),
    /// An engine failure.
    Ingest(IngestError),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Ingest(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, json!({ "detail": detail })),
            ApiError::Ingest(e) => {
                let status = match &e {
                    IngestError::Config(_) => StatusCode::BAD_REQUEST,
                    IngestError::Protocol(_) => StatusCode::SERVICE_UNAVAILABLE,
                    IngestError::Rejected { .. } | IngestError::Transport(_) | IngestError::Auth(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                error!(kind = e.kind(), error = %e, "Request failed");
                (status, json!({ "detail": e.to_string(), "kind": e.kind() }))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/subscribe/{guid}", post(subscribe))
        .route("/unsubscribe/{guid}", post(unsubscribe))
        .route("/subscriptions", get(list_subscriptions))
        .route("/start", get(start))
        .route("/stop", get(stop))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn subscribe(State(state): State<AppState>, Path(guid): Path<String>) -> Result<Json<Value>, ApiError> {
    match state.registry.subscribe(&guid).await? {
        SubscribeOutcome::Subscribed => Ok(Json(json!({ "message": format!("Subscribed to GUID: {}", guid) }))),
        SubscribeOutcome::AlreadySubscribed => Err(ApiError::BadRequest(format!("Already subscribed to GUID: {}", guid))),
    }
}

pub async fn unsubscribe(State(state): State<AppState>, Path(guid): Path<String>) -> Result<Json<Value>, ApiError> {
    match state.registry.unsubscribe(&guid).await {
        UnsubscribeOutcome::Unsubscribed => Ok(Json(json!({ "message": format!("Unsubscribed from GUID: {}", guid) }))),
        UnsubscribeOutcome::NotSubscribed => Err(ApiError::BadRequest(format!("Not subscribed to GUID: {}", guid))),
    }
}

pub async fn list_subscriptions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "subscriptions": state.registry.list().await }))
}

/// The stream starts with the process; this only reports on it.
pub async fn start(State(state): State<AppState>) -> Json<Value> {
    let health = state.health();
    let message = if state.is_stopped() {
        "Streaming service has been stopped; restart the process to resume."
    } else {
        "Streaming service is running in the background."
    };
    Json(json!({ "message": message, "running": !state.is_stopped(), "state": health.state }))
}

pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    if state.stop_streaming() {
        info!("Stop requested over HTTP");
        Json(json!({ "message": "Streaming service stopping." }))
    } else {
        Json(json!({ "message": "Streaming service already stopped." }))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<DispatchHealth> {
    Json(state.health())
}
