use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET / -- service name, version and endpoint map.
async fn service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "segmentation_model": state.config.registry.segmentation.as_str(),
        "endpoints": {
            "health": "GET /health",
            "process": "POST /process",
            "outputs": "GET /outputs/{filename}",
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(service_info))
}
