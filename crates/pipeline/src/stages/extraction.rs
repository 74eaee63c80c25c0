use async_trait::async_trait;
use image::DynamicImage;

use designlift_core::job::ImageStage;
use designlift_core::types::StageName;
use designlift_models::{ModelHandle, ModelKind};

use super::{blocking, Stage};
use crate::error::StageError;
use crate::payload::ImagePayload;
use crate::refine::flatten_on_white;

/// Sends the photo to the remote extractor and decodes the flat design it
/// returns. Output is RGB on a white background.
pub struct ExtractionStage;

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> StageName {
        StageName::Extraction
    }

    fn model(&self) -> ModelKind {
        ModelKind::Extraction
    }

    fn target(&self) -> ImageStage {
        ImageStage::Extracted
    }

    async fn transform(
        &self,
        image: ImagePayload,
        handle: &ModelHandle,
    ) -> Result<ImagePayload, StageError> {
        let extractor = handle.remote()?;

        let png = blocking(move || {
            image
                .to_png()
                .map_err(|e| StageError::Inference(format!("PNG encoding failed: {e}")))
        })
        .await?;

        let inline = extractor
            .extract(&png)
            .await
            .map_err(|e| StageError::ExternalApi(e.to_string()))?;

        tracing::debug!(
            model = extractor.model_name(),
            mime_type = %inline.mime_type,
            bytes = inline.data.len(),
            "Extractor returned image",
        );

        blocking(move || {
            let decoded = image::load_from_memory(&inline.data).map_err(|e| {
                StageError::ExternalApi(format!("extractor returned undecodable image: {e}"))
            })?;
            Ok(ImagePayload::new(DynamicImage::ImageRgb8(flatten_on_white(&decoded))))
        })
        .await
    }
}
