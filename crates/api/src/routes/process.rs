use axum::body::Bytes;
use axum::extract::State;
use axum::{routing::post, Json, Router};
use serde_json::Value;

use designlift_core::request::{ProcessRequest, ProcessResponse};
use designlift_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /process -- run one job to completion and return both output URLs.
async fn process(State(state): State<AppState>, body: Bytes) -> AppResult<Json<ProcessResponse>> {
    let request = parse_request(&body)?;
    let id = request.id.clone();
    tracing::info!(job_id = %id, "Process request received");

    state
        .executor
        .process(request)
        .await
        .map(Json)
        .map_err(|failure| AppError::new(Some(id), failure))
}

/// Decode the body, keeping hold of the id for the error response even
/// when the rest of the body is unusable.
fn parse_request(body: &[u8]) -> Result<ProcessRequest, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::validation(None, format!("Malformed JSON body: {e}")))?;
    let id = value
        .get("id")
        .and_then(|v| serde_json::from_value::<JobId>(v.clone()).ok());
    serde_json::from_value(value)
        .map_err(|e| AppError::validation(id, format!("Invalid request: {e}")))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/process", post(process))
}
