//! ONNX Runtime backend.
//!
//! Sessions are created with the CUDA execution provider when the `ModelSpec`
//! targets a GPU; ONNX Runtime falls back to CPU kernels for any node the
//! provider cannot place. Half-precision weight files are expected to
//! keep `f32` inputs and outputs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;

use designlift_core::types::Device;

use crate::backend::{InferenceBackend, Tensor};
use crate::error::ModelError;
use crate::loader::ModelLoader;
use crate::spec::ModelSpec;

/// Loads `.onnx` weight files into ONNX Runtime sessions.
#[derive(Debug, Default, Clone)]
pub struct OnnxLoader {
    intra_threads: Option<usize>,
}

impl OnnxLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intra_threads(mut self, n: usize) -> Self {
        self.intra_threads = Some(n);
        self
    }
}

#[async_trait]
impl ModelLoader for OnnxLoader {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        spec.check_weights()?;
        let spec = spec.clone();
        let threads = self.intra_threads;

        let backend = tokio::task::spawn_blocking(move || {
            let load_err = |message: String| ModelError::Load {
                kind: spec.kind,
                name: spec.name.clone(),
                message,
            };
            build_session(&spec.weights, spec.device, threads)
                .map(|session| OnnxBackend {
                    session: Mutex::new(session),
                })
                .map_err(load_err)
        })
        .await
        .map_err(|e| ModelError::Inference(format!("loader task panicked: {e}")))??;

        Ok(Arc::new(backend))
    }
}

fn build_session(path: &Path, device: Device, threads: Option<usize>) -> Result<Session, String> {
    let mut builder = Session::builder().map_err(|e| e.to_string())?;
    if let Some(n) = threads {
        builder = builder.with_intra_threads(n).map_err(|e| e.to_string())?;
    }
    if let Device::Cuda(id) = device {
        builder = builder
            .with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(id as i32)
                .build()])
            .map_err(|e| e.to_string())?;
    }
    builder.commit_from_file(path).map_err(|e| e.to_string())
}

/// One ONNX Runtime session. `Session::run` needs exclusive access, so
/// concurrent callers serialize on the mutex; the Limiter already bounds
/// how many are waiting.
pub struct OnnxBackend {
    session: Mutex<Session>,
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let shape: Vec<i64> = input.shape.iter().map(|&d| d as i64).collect();
        let value = ort::value::Tensor::from_array((shape, input.data.clone()))
            .map_err(|e| ModelError::Inference(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("session lock poisoned".into()))?;

        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        // Matting networks emit several side outputs; the final prediction
        // is the last one.
        let last = outputs.len().checked_sub(1).ok_or_else(|| {
            ModelError::Inference("model produced no outputs".into())
        })?;
        let (out_shape, data) = outputs[last]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("output tensor: {e}")))?;

        Tensor::new(
            out_shape.iter().map(|&d| d.max(0) as usize).collect(),
            data.to_vec(),
        )
    }
}
