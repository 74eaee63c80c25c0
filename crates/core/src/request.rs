//! Wire models for the HTTP surface.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::naming;
use crate::types::{ErrorKind, ImageSlot, JobId, StageName};

/// Body of `POST /process`. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProcessRequest {
    #[validate(custom(function = "validate_id"))]
    pub id: JobId,
    #[validate(nested)]
    pub output: ImageInputs,
}

/// Source URLs for the two images of a job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct ImageInputs {
    #[validate(url, custom(function = "validate_http_url"))]
    pub front: String,
    #[validate(url, custom(function = "validate_http_url"))]
    pub back: String,
}

impl ProcessRequest {
    /// Run field validation, flattening the result into a [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }
}

fn validate_id(id: &JobId) -> Result<(), ValidationError> {
    naming::validate_job_id(id).map_err(|e| {
        let mut err = ValidationError::new("invalid_id");
        err.message = Some(Cow::Owned(e.to_string()));
        err
    })
}

fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(());
    }
    let mut err = ValidationError::new("scheme");
    err.message = Some(Cow::Borrowed("URL scheme must be http or https"));
    Err(err)
}

/// `200` body of `POST /process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub id: JobId,
    pub front_output: String,
    pub back_output: String,
    pub processing_time_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub models_loaded: bool,
}

impl HealthResponse {
    pub fn from_readiness(models_loaded: bool) -> Self {
        Self {
            status: if models_loaded {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            models_loaded,
        }
    }
}

/// Structured failure body returned with every non-200 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
    pub stage: StageName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<ImageSlot>,
}
