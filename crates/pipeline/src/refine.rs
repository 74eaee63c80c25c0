//! Alpha matte refinement and channel plumbing.
//!
//! Segmentation networks emit a soft matte at their native resolution.
//! These functions bring it back to the source size and clean it up so
//! printed designs keep faint strokes but lose background haze.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};

/// Single-channel `f32` matte in `[0, 1]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matte {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Matte {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self::new(width, height, vec![value; (width * height) as usize])
    }

    /// Quantize to 8 bits, truncating like a float-to-byte cast.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.data[(y * self.width + x) as usize];
            Luma([(v.clamp(0.0, 1.0) * 255.0) as u8])
        })
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        Self::new(
            gray.width(),
            gray.height(),
            gray.pixels().map(|p| p[0] as f32 / 255.0).collect(),
        )
    }

    /// Resize through an 8-bit intermediate with a Lanczos kernel.
    pub fn resize(&self, width: u32, height: u32) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let resized = image::imageops::resize(&self.to_gray(), width, height, FilterType::Lanczos3);
        Self::from_gray(&resized)
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Linear-interpolated percentile (`p` in `[0, 100]`) of unsorted values.
pub fn percentile(values: &[f32], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Levels remap: values in `[min, max]` are stretched to `[0, 1]` and
/// gamma-corrected; values below `min` keep their original value so faint
/// detail survives. A degenerate range becomes a hard threshold at `min`.
pub fn levels(alpha: &[f32], min: f32, max: f32, gamma: f32) -> Vec<f32> {
    if (max - min).abs() < 1e-6 {
        return alpha
            .iter()
            .map(|&a| if a >= min { 1.0 } else { 0.0 })
            .collect();
    }
    alpha
        .iter()
        .map(|&a| {
            if a < min {
                a
            } else {
                ((a.clamp(min, max) - min) / (max - min)).powf(gamma)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// BiRefNet
// ---------------------------------------------------------------------------

/// Refinement parameters for the BiRefNet matte.
#[derive(Debug, Clone)]
pub struct BiRefNetParams {
    pub core_percentile: f32,
    pub core_clamp: f32,
    pub boost_percentile: f32,
    pub boost_clamp: f32,
    pub hard_min: f32,
    pub hard_max: f32,
    pub hard_gamma: f32,
    pub soft_min: f32,
    pub soft_gamma: f32,
}

impl Default for BiRefNetParams {
    fn default() -> Self {
        Self {
            core_percentile: 98.0,
            core_clamp: 0.98,
            boost_percentile: 95.0,
            boost_clamp: 0.97,
            hard_min: 0.10,
            hard_max: 0.40,
            hard_gamma: 0.7,
            soft_min: 0.10,
            soft_gamma: 0.8,
        }
    }
}

/// `(core_threshold, soft_boost_max)` from the distribution of
/// non-trivial (> 0.01) alpha values, each capped by its clamp. An empty
/// matte yields the clamps themselves.
pub fn dynamic_thresholds(alpha: &[f32], params: &BiRefNetParams) -> (f32, f32) {
    let visible: Vec<f32> = alpha.iter().copied().filter(|&a| a > 0.01).collect();
    let core = percentile(&visible, params.core_percentile)
        .map_or(params.core_clamp, |v| v.min(params.core_clamp));
    let boost = percentile(&visible, params.boost_percentile)
        .map_or(params.boost_clamp, |v| v.min(params.boost_clamp));
    (core, boost)
}

/// Hard boost for faint strokes, soft boost for mid-tones, then a solid
/// core above the dynamic threshold.
pub fn refine_birefnet(matte: &Matte, params: &BiRefNetParams) -> Matte {
    let (core, boost_max) = dynamic_thresholds(&matte.data, params);
    tracing::debug!(core_threshold = core, soft_boost_max = boost_max, "BiRefNet thresholds");

    let hard = levels(&matte.data, params.hard_min, params.hard_max, params.hard_gamma);
    let soft = levels(&matte.data, params.soft_min, boost_max, params.soft_gamma);

    let data = matte
        .data
        .iter()
        .zip(hard.iter().zip(soft.iter()))
        .map(|(&a, (&h, &s))| {
            let solid = if a >= core { 1.0 } else { 0.0 };
            h.max(s).max(solid)
        })
        .collect();
    Matte::new(matte.width, matte.height, data)
}

// ---------------------------------------------------------------------------
// RMBG
// ---------------------------------------------------------------------------

/// Refinement parameters for the RMBG matte.
#[derive(Debug, Clone)]
pub struct RmbgParams {
    pub noise_threshold: f32,
    pub min_component_area: usize,
    pub penumbra_floor: f32,
    pub core_threshold: f32,
    pub guided_radius: u32,
    pub guided_eps: f32,
}

impl Default for RmbgParams {
    fn default() -> Self {
        Self {
            noise_threshold: 0.05,
            min_component_area: 50,
            penumbra_floor: 0.05,
            core_threshold: 0.90,
            guided_radius: 5,
            guided_eps: 0.02,
        }
    }
}

/// Zero every 8-connected component of `alpha > threshold` smaller than
/// `min_area` pixels.
pub fn remove_small_components(matte: &Matte, threshold: f32, min_area: usize) -> Matte {
    let (w, h) = (matte.width as usize, matte.height as usize);
    let mut label = vec![0u32; w * h];
    let mut keep = vec![false; w * h];
    let mut next = 0u32;
    let mut stack = Vec::new();
    let mut members = Vec::new();

    for start in 0..w * h {
        if label[start] != 0 || matte.data[start] <= threshold {
            continue;
        }
        next += 1;
        label[start] = next;
        stack.push(start);
        members.clear();

        while let Some(i) = stack.pop() {
            members.push(i);
            let (x, y) = ((i % w) as isize, (i / w) as isize);
            for dy in -1..=1isize {
                for dx in -1..=1isize {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let j = ny as usize * w + nx as usize;
                    if label[j] == 0 && matte.data[j] > threshold {
                        label[j] = next;
                        stack.push(j);
                    }
                }
            }
        }

        if members.len() >= min_area {
            for &i in &members {
                keep[i] = true;
            }
        }
    }

    let data = matte
        .data
        .iter()
        .zip(&keep)
        .map(|(&a, &k)| if k { a } else { 0.0 })
        .collect();
    Matte::new(matte.width, matte.height, data)
}

/// Mean over a `(2r+1)^2` window clipped to the image, via an integral
/// image.
fn box_mean(data: &[f32], w: usize, h: usize, r: usize) -> Vec<f32> {
    let mut integral = vec![0f64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row = 0f64;
        for x in 0..w {
            row += data[y * w + x] as f64;
            integral[(y + 1) * (w + 1) + x + 1] = integral[y * (w + 1) + x + 1] + row;
        }
    }
    let mut out = vec![0f32; w * h];
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let sum = integral[y1 * (w + 1) + x1] - integral[y0 * (w + 1) + x1]
                - integral[y1 * (w + 1) + x0]
                + integral[y0 * (w + 1) + x0];
            out[y * w + x] = (sum / ((y1 - y0) * (x1 - x0)) as f64) as f32;
        }
    }
    out
}

/// Edge-preserving smoothing of `matte` guided by a grayscale image in
/// `[0, 1]`.
pub fn guided_filter(matte: &Matte, guide: &[f32], radius: u32, eps: f32) -> Matte {
    let (w, h, r) = (matte.width as usize, matte.height as usize, radius as usize);
    let p = &matte.data;

    let mean_i = box_mean(guide, w, h, r);
    let mean_p = box_mean(p, w, h, r);
    let ii: Vec<f32> = guide.iter().map(|v| v * v).collect();
    let ip: Vec<f32> = guide.iter().zip(p).map(|(i, p)| i * p).collect();
    let corr_i = box_mean(&ii, w, h, r);
    let corr_ip = box_mean(&ip, w, h, r);

    let mut a = vec![0f32; w * h];
    let mut b = vec![0f32; w * h];
    for k in 0..w * h {
        let var_i = corr_i[k] - mean_i[k] * mean_i[k];
        let cov_ip = corr_ip[k] - mean_i[k] * mean_p[k];
        a[k] = cov_ip / (var_i + eps);
        b[k] = mean_p[k] - a[k] * mean_i[k];
    }

    let mean_a = box_mean(&a, w, h, r);
    let mean_b = box_mean(&b, w, h, r);
    let data = (0..w * h)
        .map(|k| (mean_a[k] * guide[k] + mean_b[k]).clamp(0.0, 1.0))
        .collect();
    Matte::new(matte.width, matte.height, data)
}

/// Denoise, drop the faint penumbra, solidify the core, then smooth edges
/// along the source image.
pub fn refine_rmbg(matte: &Matte, source: &RgbImage, params: &RmbgParams) -> Matte {
    let cleaned = remove_small_components(matte, params.noise_threshold, params.min_component_area);
    let shaped: Vec<f32> = cleaned
        .data
        .iter()
        .map(|&a| {
            let a = if a > params.penumbra_floor { a } else { 0.0 };
            if a > params.core_threshold {
                1.0
            } else {
                a
            }
        })
        .collect();
    let shaped = Matte::new(matte.width, matte.height, shaped);
    let guide = luminance(source);
    guided_filter(&shaped, &guide, params.guided_radius, params.guided_eps)
}

fn luminance(image: &RgbImage) -> Vec<f32> {
    image
        .pixels()
        .map(|Rgb([r, g, b])| (0.299 * *r as f32 + 0.587 * *g as f32 + 0.114 * *b as f32) / 255.0)
        .collect()
}

// ---------------------------------------------------------------------------
// Channel plumbing
// ---------------------------------------------------------------------------

/// Composite onto white and drop alpha.
pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Attach a matte to an RGB image of the same size.
pub fn apply_matte(rgb: &RgbImage, matte: &Matte) -> RgbaImage {
    let alpha = matte.to_gray();
    RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        image::Rgba([r, g, b, alpha.get_pixel(x, y)[0]])
    })
}

/// Split RGBA into its color planes and a 3-channel copy of its alpha.
pub fn split_alpha(rgba: &RgbaImage) -> (RgbImage, RgbImage) {
    let rgb = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, _] = rgba.get_pixel(x, y).0;
        Rgb([r, g, b])
    });
    let alpha = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let a = rgba.get_pixel(x, y)[3];
        Rgb([a, a, a])
    });
    (rgb, alpha)
}

/// Recombine color planes with the first channel of an alpha image.
pub fn merge_alpha(rgb: &RgbImage, alpha: &RgbImage) -> RgbaImage {
    RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        image::Rgba([r, g, b, alpha.get_pixel(x, y)[0]])
    })
}

/// Jet-colormap rendering of an alpha channel: blue for transparent, red
/// for opaque.
pub fn alpha_heatmap(rgba: &RgbaImage) -> RgbImage {
    let channel =
        |t: f32, centre: f32| ((1.5 - (4.0 * t - centre).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let t = rgba.get_pixel(x, y)[3] as f32 / 255.0;
        Rgb([channel(t, 3.0), channel(t, 2.0), channel(t, 1.0)])
    })
}
