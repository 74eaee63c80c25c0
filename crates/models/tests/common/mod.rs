use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use designlift_core::types::Device;
use designlift_gemini::{GeminiError, InlineImage};
use designlift_models::{
    DesignExtractor, InferenceBackend, ModelError, ModelKind, ModelLoader, ModelSpec,
    RegistryConfig, SegmentationVariant, Tensor,
};

pub struct EchoExtractor;

#[async_trait]
impl DesignExtractor for EchoExtractor {
    fn model_name(&self) -> &str {
        "fake-extractor"
    }

    async fn extract(&self, png: &[u8]) -> Result<InlineImage, GeminiError> {
        Ok(InlineImage {
            mime_type: "image/png".into(),
            data: png.to_vec(),
        })
    }
}

pub struct IdentityBackend;

impl InferenceBackend for IdentityBackend {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        Ok(input.clone())
    }
}

/// Loader that counts calls, optionally sleeps, and optionally fails on
/// one model kind.
#[derive(Default)]
pub struct FakeLoader {
    pub calls: AtomicUsize,
    pub loaded: Mutex<Vec<ModelKind>>,
    pub delay: Option<Duration>,
    pub fail_on: Option<ModelKind>,
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(spec.kind) {
            return Err(ModelError::WeightsNotFound(spec.weights.clone()));
        }
        self.loaded.lock().unwrap().push(spec.kind);
        Ok(Arc::new(IdentityBackend))
    }
}

pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        model_dir: PathBuf::from("/models"),
        segmentation: SegmentationVariant::BiRefNet,
        device: Device::Cpu,
        use_half: true,
    }
}
