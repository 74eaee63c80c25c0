use async_trait::async_trait;
use image::DynamicImage;

use designlift_core::job::ImageStage;
use designlift_core::types::StageName;
use designlift_models::{InferenceBackend, ModelHandle, ModelKind, UPSCALE_FACTOR};

use super::tensor::{rgb_to_unit_nchw, unit_nchw_to_rgb};
use super::{blocking, Stage};
use crate::error::StageError;
use crate::payload::ImagePayload;
use crate::refine::{merge_alpha, split_alpha};

/// Enlarges a segmented image by [`UPSCALE_FACTOR`].
///
/// The network only sees RGB, so colour and alpha are upscaled as two
/// separate passes and recombined.
pub struct UpscaleStage;

#[async_trait]
impl Stage for UpscaleStage {
    fn name(&self) -> StageName {
        StageName::Upscale
    }

    fn model(&self) -> ModelKind {
        ModelKind::Upscale
    }

    fn target(&self) -> ImageStage {
        ImageStage::Upscaled
    }

    async fn transform(
        &self,
        image: ImagePayload,
        handle: &ModelHandle,
    ) -> Result<ImagePayload, StageError> {
        let backend = handle.local()?.clone();

        blocking(move || {
            let DynamicImage::ImageRgba8(rgba) = image.into_image() else {
                return Err(StageError::Inference(
                    "upscale expects an RGBA image from segmentation".into(),
                ));
            };
            let (width, height) = rgba.dimensions();
            let (rgb, alpha) = split_alpha(&rgba);

            let rgb_up = enlarge(backend.as_ref(), &rgb, width, height)?;
            let alpha_up = enlarge(backend.as_ref(), &alpha, width, height)?;

            Ok(ImagePayload::new(DynamicImage::ImageRgba8(merge_alpha(
                &rgb_up, &alpha_up,
            ))))
        })
        .await
    }
}

fn enlarge(
    backend: &dyn InferenceBackend,
    rgb: &image::RgbImage,
    width: u32,
    height: u32,
) -> Result<image::RgbImage, StageError> {
    let output = backend.infer(&rgb_to_unit_nchw(rgb))?;
    let out = unit_nchw_to_rgb(&output)?;
    let expected = (width * UPSCALE_FACTOR, height * UPSCALE_FACTOR);
    if out.dimensions() != expected {
        return Err(StageError::Inference(format!(
            "upscaler returned {}x{}, expected {}x{}",
            out.width(),
            out.height(),
            expected.0,
            expected.1
        )));
    }
    Ok(out)
}
