//! Which models exist and where their weights live.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use designlift_core::types::{Device, Precision};

use crate::error::ModelError;

/// Integer enlargement applied by the upscaling network.
pub const UPSCALE_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Extraction,
    Segmentation,
    Upscale,
}

impl ModelKind {
    /// Whether calls to this model run on the local GPU.
    pub fn gpu_bound(self) -> bool {
        !matches!(self, ModelKind::Extraction)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Extraction => "extraction",
            ModelKind::Segmentation => "segmentation",
            ModelKind::Upscale => "upscale",
        })
    }
}

/// Segmentation network flavour. Also the pipeline variant embedded in
/// artifact filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentationVariant {
    /// BiRefNet HR matting, refined with percentile-driven alpha boosts.
    BiRefNet,
    /// RMBG 2.0, refined with connected-component denoising.
    Rmbg,
}

impl SegmentationVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentationVariant::BiRefNet => "birefnet",
            SegmentationVariant::Rmbg => "rmbg",
        }
    }

    /// Square input resolution the network was trained at.
    pub fn input_size(self) -> u32 {
        1024
    }
}

impl fmt::Display for SegmentationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentationVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "birefnet" => Ok(SegmentationVariant::BiRefNet),
            "rmbg" => Ok(SegmentationVariant::Rmbg),
            other => Err(format!(
                "unknown segmentation model '{other}', expected birefnet or rmbg"
            )),
        }
    }
}

/// Everything a [`ModelLoader`](crate::ModelLoader) needs to load one
/// local model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    pub name: String,
    pub weights: PathBuf,
    pub device: Device,
    pub precision: Precision,
}

impl ModelSpec {
    pub fn segmentation(
        model_dir: &Path,
        variant: SegmentationVariant,
        device: Device,
        precision: Precision,
    ) -> Self {
        let name = variant.as_str();
        Self {
            kind: ModelKind::Segmentation,
            name: name.to_string(),
            weights: weights_path(model_dir, name, name, precision),
            device,
            precision,
        }
    }

    pub fn upscale(model_dir: &Path, device: Device, precision: Precision) -> Self {
        Self {
            kind: ModelKind::Upscale,
            name: "realesrgan-x4".to_string(),
            weights: weights_path(model_dir, "realesrgan", "realesrgan_x4plus", precision),
            device,
            precision,
        }
    }

    /// Fail early with a clear error when the weights file is missing.
    pub fn check_weights(&self) -> Result<(), ModelError> {
        if self.weights.is_file() {
            Ok(())
        } else {
            Err(ModelError::WeightsNotFound(self.weights.clone()))
        }
    }
}

/// `{dir}/{subdir}/{stem}.onnx`, or `{stem}.fp16.onnx` for half precision.
fn weights_path(model_dir: &Path, subdir: &str, stem: &str, precision: Precision) -> PathBuf {
    let file = match precision {
        Precision::Full => format!("{stem}.onnx"),
        Precision::Half => format!("{stem}.fp16.onnx"),
    };
    model_dir.join(subdir).join(file)
}
