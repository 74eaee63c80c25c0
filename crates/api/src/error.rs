use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use designlift_core::job::JobFailure;
use designlift_core::request::ErrorBody;
use designlift_core::types::{ErrorKind, JobId, StageName};

/// Seconds a caller should wait after a `ResourceExhausted` rejection.
pub const RETRY_AFTER_SECS: u64 = 5;

/// A failed `/process` call, echoing the job id when it could be read.
#[derive(Debug, thiserror::Error)]
#[error("{failure}")]
pub struct AppError {
    pub id: Option<JobId>,
    pub failure: JobFailure,
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(id: Option<JobId>, failure: JobFailure) -> Self {
        Self { id, failure }
    }

    /// Request rejected before any pipeline work.
    pub fn validation(id: Option<JobId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JobFailure::new(ErrorKind::ValidationError, StageName::Request, message),
        )
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.failure.kind)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::DownloadError | ErrorKind::ExternalApiError => StatusCode::BAD_GATEWAY,
        ErrorKind::ModelInferenceError | ErrorKind::StorageError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ErrorKind::ResourceExhausted | ErrorKind::ServiceUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let id = self.id.as_ref().map(ToString::to_string).unwrap_or_default();
        if status.is_server_error() {
            tracing::error!(job_id = %id, error = %self.failure, "Request failed");
        } else {
            tracing::warn!(job_id = %id, error = %self.failure, "Request rejected");
        }

        let kind = self.failure.kind;
        let body = ErrorBody {
            id: self.id,
            error: self.failure.message,
            code: kind.code().to_string(),
            kind,
            stage: self.failure.stage,
            slot: self.failure.slot,
        };

        let mut response = (status, Json(body)).into_response();
        if kind == ErrorKind::ResourceExhausted {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}
