//! Health check endpoint

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/healthz", get(health))
}

/// GET /healthz - liveness probe
async fn health() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}
