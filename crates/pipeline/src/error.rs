//! Component errors and their mapping onto the public [`ErrorKind`]s.

use std::time::Duration;

use designlift_core::error::CoreError;
use designlift_core::types::ErrorKind;
use designlift_models::ModelError;

/// Asset Fetcher failures. All surface as `DownloadError`.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Unexpected content type '{content_type}' from {url}")]
    ContentType { url: String, content_type: String },

    #[error("Payload from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Could not decode image from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Connection resets, 5xx and timeouts may succeed on retry; everything
    /// else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DownloadError
    }
}

/// Concurrency Limiter failures.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("No GPU slot became free within {0:?}")]
    Timeout(Duration),

    #[error("Limiter is closed")]
    Closed,
}

impl LimiterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LimiterError::Timeout(_) => ErrorKind::ResourceExhausted,
            LimiterError::Closed => ErrorKind::ServiceUnavailable,
        }
    }
}

/// A stage's typed failure.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The remote extraction service failed or returned something unusable.
    #[error("{0}")]
    ExternalApi(String),

    /// Local inference or pre/post-processing failed.
    #[error("{0}")]
    Inference(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::ExternalApi(_) => ErrorKind::ExternalApiError,
            StageError::Inference(_) => ErrorKind::ModelInferenceError,
            StageError::Model(e) => match e {
                ModelError::Extraction(_) => ErrorKind::ExternalApiError,
                ModelError::NotReady | ModelError::InitFailed(_) => ErrorKind::ServiceUnavailable,
                _ => ErrorKind::ModelInferenceError,
            },
        }
    }
}

/// Output Writer failures.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Naming(#[from] CoreError),

    /// The job failed while this image was being written; the file was
    /// discarded.
    #[error("Write abandoned: job already failed")]
    Abandoned,
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteError::Naming(CoreError::Validation(_)) => ErrorKind::ValidationError,
            _ => ErrorKind::StorageError,
        }
    }
}
