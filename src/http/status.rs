//! `GET /optimization-status` and `GET /` (§6).

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// Snapshot of the prewarm cache, AMD registry, and predictor — shared
/// between the standalone `/optimization-status` endpoint and the
/// `optimizations` field returned from `POST /outbound-call`.
pub async fn optimization_snapshot(state: &AppState) -> serde_json::Value {
    json!({
        "prewarm_cache": {
            "size": state.prewarm.len().await,
            "target": state.prewarm.target(),
        },
        "amd_registry": {
            "pending": state.amd.len().await,
        },
        "predicted_next_window_calls": state.predictor.predict_next_window().await,
    })
}

pub async fn handle_optimization_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(optimization_snapshot(&state).await)
}

pub async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Server is running" }))
}
