//! Health check and monitoring endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use vigil_common::GuardSnapshot;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    store: bool,
}

/// Readiness check (is the user store reachable?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    match state.flow.users().ping().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready",
            store: true,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            // Return 503 if not ready
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    node_id: String,
    uptime_secs: u64,
    #[serde(flatten)]
    guard: GuardSnapshot,
}

/// Guard counters for monitoring
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        node_id: state.node_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        guard: state.guard.snapshot(state.guard.now()),
    })
}
