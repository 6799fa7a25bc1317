//! Liveness endpoint.

use axum::extract::State;
use axum::Json;

use crate::schema::common::HealthResponse;
use crate::state::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_runs: state.lock_manager.status(),
    })
}
