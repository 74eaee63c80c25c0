//! Stand-in loader for builds without the `onnx` feature.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::InferenceBackend;
use crate::error::ModelError;
use crate::loader::ModelLoader;
use crate::spec::ModelSpec;

/// Always fails: this binary was compiled without ONNX Runtime.
#[derive(Debug, Default, Clone)]
pub struct OnnxLoader;

impl OnnxLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn with_intra_threads(self, _n: usize) -> Self {
        self
    }
}

#[async_trait]
impl ModelLoader for OnnxLoader {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        Err(ModelError::BackendUnavailable(format!(
            "cannot load {} ({}): rebuild with `--features onnx`",
            spec.name,
            spec.weights.display()
        )))
    }
}
