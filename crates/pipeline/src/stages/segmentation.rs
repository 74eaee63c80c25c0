use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::DynamicImage;

use designlift_core::job::ImageStage;
use designlift_core::types::StageName;
use designlift_models::{ModelHandle, ModelKind, SegmentationVariant};

use super::tensor::{logits_to_matte, rgb_to_nchw, IMAGENET_MEAN, IMAGENET_STD};
use super::{blocking, Stage};
use crate::error::StageError;
use crate::payload::ImagePayload;
use crate::refine::{apply_matte, refine_birefnet, refine_rmbg, BiRefNetParams, RmbgParams};

/// Predicts a foreground matte and attaches it as the alpha channel.
pub struct SegmentationStage {
    variant: SegmentationVariant,
}

impl SegmentationStage {
    pub fn new(variant: SegmentationVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> SegmentationVariant {
        self.variant
    }
}

#[async_trait]
impl Stage for SegmentationStage {
    fn name(&self) -> StageName {
        StageName::Segmentation
    }

    fn model(&self) -> ModelKind {
        ModelKind::Segmentation
    }

    fn target(&self) -> ImageStage {
        ImageStage::Segmented
    }

    async fn transform(
        &self,
        image: ImagePayload,
        handle: &ModelHandle,
    ) -> Result<ImagePayload, StageError> {
        let backend = handle.local()?.clone();
        let variant = self.variant;

        blocking(move || {
            let source = image.into_image().to_rgb8();
            let (width, height) = source.dimensions();
            let side = variant.input_size();

            let input = imageops::resize(&source, side, side, FilterType::Triangle);
            let tensor = rgb_to_nchw(&input, IMAGENET_MEAN, IMAGENET_STD);
            let logits = backend.infer(&tensor)?;
            let matte = logits_to_matte(&logits)?.resize(width, height);

            let refined = match variant {
                SegmentationVariant::BiRefNet => {
                    refine_birefnet(&matte, &BiRefNetParams::default())
                }
                SegmentationVariant::Rmbg => refine_rmbg(&matte, &source, &RmbgParams::default()),
            };

            Ok(ImagePayload::new(DynamicImage::ImageRgba8(apply_matte(
                &source, &refined,
            ))))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use designlift_core::types::{Device, Precision};
    use designlift_models::{InferenceBackend, ModelBackend, ModelError, Tensor};
    use image::{Rgb, RgbImage};

    use super::*;

    /// Emits a constant logit map shaped like the input.
    struct ConstantLogits(f32);

    impl InferenceBackend for ConstantLogits {
        fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
            assert_eq!(input.shape, vec![1, 3, 1024, 1024]);
            let (_, h, w) = input.chw()?;
            Tensor::new(vec![1, 1, h, w], vec![self.0; h * w])
        }
    }

    fn handle(logit: f32) -> ModelHandle {
        ModelHandle::new(
            ModelKind::Segmentation,
            "constant",
            Device::Cpu,
            Precision::Full,
            ModelBackend::Local(Arc::new(ConstantLogits(logit))),
        )
    }

    fn photo() -> ImagePayload {
        ImagePayload::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            40,
            30,
            Rgb([200, 40, 40]),
        )))
    }

    #[tokio::test]
    async fn confident_foreground_is_opaque_at_source_size() {
        for variant in [SegmentationVariant::BiRefNet, SegmentationVariant::Rmbg] {
            let out = SegmentationStage::new(variant)
                .transform(photo(), &handle(10.0))
                .await
                .unwrap();
            let DynamicImage::ImageRgba8(rgba) = out.into_image() else {
                panic!("expected RGBA output");
            };
            assert_eq!(rgba.dimensions(), (40, 30));
            // Quantization can leave the guided filter a hair under 1.0.
            assert!(rgba.pixels().all(|p| p[3] >= 254), "{variant}");
            assert_eq!(rgba.get_pixel(5, 5)[0], 200);
        }
    }

    #[tokio::test]
    async fn confident_background_is_transparent() {
        let out = SegmentationStage::new(SegmentationVariant::Rmbg)
            .transform(photo(), &handle(-10.0))
            .await
            .unwrap();
        let rgba = out.into_image().to_rgba8();
        assert!(rgba.pixels().all(|p| p[3] == 0));
    }
}
