//! Conversions between images and NCHW tensors.

use image::{Rgb, RgbImage};

use designlift_models::{ModelError, Tensor};

use crate::refine::{sigmoid, Matte};

/// ImageNet channel statistics expected by the matting networks.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// `[1, 3, H, W]` tensor of `(pixel / 255 - mean) / std`.
pub fn rgb_to_nchw(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Tensor {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let plane = w * h;
    let mut data = vec![0f32; 3 * plane];
    for (i, Rgb(px)) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (px[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    Tensor {
        shape: vec![1, 3, h, w],
        data,
    }
}

/// `[1, 3, H, W]` tensor scaled to `[0, 1]`.
pub fn rgb_to_unit_nchw(image: &RgbImage) -> Tensor {
    rgb_to_nchw(image, [0.0; 3], [1.0; 3])
}

/// Inverse of [`rgb_to_unit_nchw`], clamping to `[0, 1]`.
pub fn unit_nchw_to_rgb(tensor: &Tensor) -> Result<RgbImage, ModelError> {
    let (c, h, w) = tensor.chw()?;
    if c != 3 {
        return Err(ModelError::Shape {
            expected: "3 channels".into(),
            actual: tensor.shape.clone(),
        });
    }
    let plane = h * w;
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let i = y as usize * w + x as usize;
        Rgb([
            to_u8(tensor.data[i]),
            to_u8(tensor.data[plane + i]),
            to_u8(tensor.data[2 * plane + i]),
        ])
    }))
}

/// First channel of a logit map, passed through a sigmoid.
pub fn logits_to_matte(tensor: &Tensor) -> Result<Matte, ModelError> {
    let (_, h, w) = tensor.chw()?;
    let data = tensor.data[..h * w].iter().map(|&v| sigmoid(v)).collect();
    Ok(Matte::new(w as u32, h as u32, data))
}
