//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: liveness plus dispatcher load.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.dispatcher.registry();
    Json(json!({
        "status": "ok",
        "service": "shelfcast-api",
        "version": env!("CARGO_PKG_VERSION"),
        "tasks": registry.len(),
        "outstanding_jobs": registry.outstanding_jobs()
    }))
}
