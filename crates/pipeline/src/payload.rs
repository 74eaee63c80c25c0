use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

/// The in-memory image handed from stage to stage.
///
/// Stages take it by value and return a new one, so no stage can keep a
/// reference to another stage's output.
#[derive(Debug, Clone)]
pub struct ImagePayload(DynamicImage);

impl ImagePayload {
    pub fn new(image: DynamicImage) -> Self {
        Self(image)
    }

    pub fn image(&self) -> &DynamicImage {
        &self.0
    }

    pub fn into_image(self) -> DynamicImage {
        self.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    /// Encode as PNG. CPU-bound; call from a blocking context.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        self.0.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

impl From<DynamicImage> for ImagePayload {
    fn from(image: DynamicImage) -> Self {
        Self(image)
    }
}
