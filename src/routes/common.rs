//! Service routes mounted next to resources: liveness, readiness and build info.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

async fn live() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 503 while the store cannot be reached.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "store": "ok" }))),
        Err(e) => {
            tracing::warn!(error = %e, "store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "store": "unavailable" })),
            )
        }
    }
}

async fn build_info() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health`, `GET /ready`, `GET /version`.
pub fn common_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(live))
        .route("/ready", get(ready))
        .route("/version", get(build_info))
}
