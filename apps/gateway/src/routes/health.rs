use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthcheck", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub port: u16,
    pub node_id: String,
    pub local_sessions: u64,
}

/// Liveness probe. Reads only process-local state.
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    if !state.subscription.is_live() {
        return Err(ApiError::service_unavailable(
            "Not subscribed to cluster channels",
        ));
    }
    if !state.shutdown.is_running() {
        return Err(ApiError::service_unavailable("Gateway is shutting down"));
    }
    Ok(Json(HealthResponse {
        status: "ok",
        port: state.config.port,
        node_id: state.node_id.clone(),
        local_sessions: state.tracker.local_session_count(),
    }))
}
