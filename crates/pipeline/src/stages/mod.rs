//! Stage implementations.
//!
//! Every stage satisfies the same contract: take one image by value plus
//! the model handle for its step, return a new image or a typed failure.
//! Stages never retry and never touch the limiter; admission and
//! cancellation belong to the executor.

use std::sync::Arc;

use async_trait::async_trait;

use designlift_core::job::ImageStage;
use designlift_core::types::StageName;
use designlift_models::{ModelHandle, ModelKind, SegmentationVariant};

use crate::error::StageError;
use crate::payload::ImagePayload;

mod extraction;
mod segmentation;
pub mod tensor;
mod upscale;

pub use extraction::ExtractionStage;
pub use segmentation::SegmentationStage;
pub use upscale::UpscaleStage;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Model whose handle this stage consumes.
    fn model(&self) -> ModelKind;

    /// State an image reaches when this stage succeeds.
    fn target(&self) -> ImageStage;

    /// GPU-bound stages run under a limiter slot.
    fn gpu_bound(&self) -> bool {
        self.model().gpu_bound()
    }

    async fn transform(
        &self,
        image: ImagePayload,
        handle: &ModelHandle,
    ) -> Result<ImagePayload, StageError>;
}

/// Extraction, segmentation, upscale, in pipeline order.
pub fn standard_stages(variant: SegmentationVariant) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ExtractionStage),
        Arc::new(SegmentationStage::new(variant)),
        Arc::new(UpscaleStage),
    ]
}

/// Run CPU-heavy work on the blocking pool, mapping a panicked task to an
/// inference failure.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StageError::Inference(format!("stage worker failed: {e}")))?
}
