use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::state::AppState;
use crate::types::HealthResponse;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        backend: state.store.backend_name().to_string(),
        cache: state.cache.stats(),
    })
}
