use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Caller-supplied job identifier: an integer or a string.
///
/// Serialized back in the same shape it arrived in so the caller can
/// correlate responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Int(i64),
    Str(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Int(n) => write!(f, "{n}"),
            JobId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for JobId {
    fn from(n: i64) -> Self {
        JobId::Int(n)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId::Str(s.to_string())
    }
}

/// Which of the two product photos an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSlot {
    Front,
    Back,
}

impl ImageSlot {
    pub const ALL: [ImageSlot; 2] = [ImageSlot::Front, ImageSlot::Back];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageSlot::Front => "front",
            ImageSlot::Back => "back",
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision a model runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Full,
    Half,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precision::Full => "fp32",
            Precision::Half => "fp16",
        })
    }
}

/// Where a model is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl Device {
    pub fn is_gpu(self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

impl FromStr for Device {
    type Err = CoreError;

    /// Accepts `cpu`, `cuda` (device 0) and `cuda:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Unknown device '{other}'. Expected cpu, cuda or cuda:<n>"
                    ))
                }),
        }
    }
}

/// Pipeline step a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    /// Request validation and admission, before any image work.
    Request,
    Download,
    Extraction,
    Segmentation,
    Upscale,
    Persist,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Request => "request",
            StageName::Download => "download",
            StageName::Extraction => "extraction",
            StageName::Segmentation => "segmentation",
            StageName::Upscale => "upscale",
            StageName::Persist => "persist",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    DownloadError,
    #[serde(rename = "ExternalAPIError")]
    ExternalApiError,
    ModelInferenceError,
    StorageError,
    ResourceExhausted,
    ServiceUnavailable,
    Timeout,
}

impl ErrorKind {
    /// Machine-readable code used in error response bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::DownloadError => "DOWNLOAD_ERROR",
            ErrorKind::ExternalApiError => "EXTERNAL_API_ERROR",
            ErrorKind::ModelInferenceError => "MODEL_INFERENCE_ERROR",
            ErrorKind::StorageError => "STORAGE_ERROR",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::DownloadError => "DownloadError",
            ErrorKind::ExternalApiError => "ExternalAPIError",
            ErrorKind::ModelInferenceError => "ModelInferenceError",
            ErrorKind::StorageError => "StorageError",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ErrorKind::Timeout => "Timeout",
        })
    }
}
