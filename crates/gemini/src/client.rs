//! HTTP client for `generateContent`.
//!
//! One [`GeminiClient`] is built at startup and shared; [`reqwest::Client`]
//! pools connections internally. The client never retries: a failed call
//! is reported to the caller as-is.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};

use crate::prompt::RELAXED_SAFETY_CATEGORIES;
use crate::wire::{
    Content, GenerateRequest, GenerateResponse, GenerationConfig, InlineData, Part,
    SafetySetting,
};

/// The key travels in a header so it never appears in a request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Connection settings for the generative API.
#[derive(Clone)]
pub struct GeminiConfig {
    /// Base URL up to and including the API version, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Upper bound on one `generateContent` round trip.
    pub timeout: Duration,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Errors from the generative API layer.
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Invalid Gemini configuration: {0}")]
    Config(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Gemini request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx status.
    #[error("Gemini API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Gemini response could not be parsed: {0}")]
    MalformedResponse(String),

    /// Response was well-formed but carried no image part.
    #[error("Gemini returned no image (finish reason: {finish_reason})")]
    NoImage { finish_reason: String },
}

/// Image bytes returned by the API.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Build a client. Fails if the key or model is empty.
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        if config.api_key.trim().is_empty() {
            return Err(GeminiError::Config("API key is empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(GeminiError::Config("model name is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeminiError::Request(e.without_url()))?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, prompt: &str, png: &[u8]) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/png".into(),
                            data: general_purpose::STANDARD.encode(png),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".into()],
                temperature: self.config.temperature,
            },
            safety_settings: RELAXED_SAFETY_CATEGORIES
                .iter()
                .map(|c| SafetySetting {
                    category: (*c).to_string(),
                    threshold: "BLOCK_NONE".into(),
                })
                .collect(),
        }
    }

    /// Send `prompt` and a PNG, returning the first image in the reply.
    pub async fn generate_image(
        &self,
        prompt: &str,
        png: &[u8],
    ) -> Result<InlineImage, GeminiError> {
        let body = self.build_request(prompt, png);

        tracing::debug!(model = %self.config.model, input_bytes = png.len(), "Sending generateContent");

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = Self::ensure_success(response).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| match e.is_timeout() {
                true => GeminiError::Timeout(self.config.timeout),
                false => GeminiError::MalformedResponse(e.without_url().to_string()),
            })?;

        let Some(inline) = parsed.first_inline_image() else {
            return Err(GeminiError::NoImage {
                finish_reason: parsed.finish_reason().unwrap_or("none").to_string(),
            });
        };

        let data = general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| GeminiError::MalformedResponse(format!("inline data: {e}")))?;

        tracing::debug!(mime_type = %inline.mime_type, output_bytes = data.len(), "Received image");

        Ok(InlineImage {
            mime_type: inline.mime_type.clone(),
            data,
        })
    }

    // ---- private helpers ----

    fn classify(&self, e: reqwest::Error) -> GeminiError {
        if e.is_timeout() {
            GeminiError::Timeout(self.config.timeout)
        } else {
            GeminiError::Request(e.without_url())
        }
    }

    /// Turn a non-2xx response into [`GeminiError::ApiError`] with the body
    /// text attached.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GeminiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GeminiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}
