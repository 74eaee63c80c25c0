//! Remote extraction seam.

use async_trait::async_trait;

use designlift_gemini::prompt::EXTRACTION_PROMPT;
use designlift_gemini::{GeminiClient, GeminiError, InlineImage};

/// A remote service that isolates the printed design in a garment photo.
#[async_trait]
pub trait DesignExtractor: Send + Sync {
    /// Identifier reported in logs and handles.
    fn model_name(&self) -> &str;

    /// Send one PNG-encoded photo, receive the extracted design image.
    async fn extract(&self, png: &[u8]) -> Result<InlineImage, GeminiError>;
}

#[async_trait]
impl DesignExtractor for GeminiClient {
    fn model_name(&self) -> &str {
        self.model()
    }

    async fn extract(&self, png: &[u8]) -> Result<InlineImage, GeminiError> {
        self.generate_image(EXTRACTION_PROMPT, png).await
    }
}
