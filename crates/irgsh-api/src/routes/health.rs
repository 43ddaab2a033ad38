//! Health check endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "jobTracking": state.orchestrator.job_tracking_enabled(),
        "monitoring": state.fleet.is_some(),
    }))
}

pub(crate) async fn version(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "version": state.version }))
}
