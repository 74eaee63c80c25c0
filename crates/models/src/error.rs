use std::path::PathBuf;

use designlift_gemini::GeminiError;

use crate::spec::ModelKind;

/// Errors from model loading and inference.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The binary was built without an inference runtime.
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Model weights not found at {}", .0.display())]
    WeightsNotFound(PathBuf),

    #[error("Failed to load {kind} model '{name}': {message}")]
    Load {
        kind: ModelKind,
        name: String,
        message: String,
    },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected tensor shape: expected {expected}, got {actual:?}")]
    Shape { expected: String, actual: Vec<usize> },

    #[error("Extraction call failed: {0}")]
    Extraction(#[from] GeminiError),

    /// A handle was requested before initialization finished.
    #[error("Models are not loaded")]
    NotReady,

    /// Initialization already ran and failed; the process cannot serve.
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("{kind} handle has no {expected} backend")]
    WrongBackend {
        kind: ModelKind,
        expected: &'static str,
    },
}
