use axum::extract::State;
use axum::{routing::get, Json, Router};

use designlift_core::request::HealthResponse;

use crate::state::AppState;

/// GET /health -- always 200; `models_loaded` mirrors registry readiness.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_readiness(state.registry.is_ready()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
