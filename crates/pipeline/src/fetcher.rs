//! Asset Fetcher: download input images over HTTP.
//!
//! Each attempt is bounded by a timeout and a byte cap. Transient
//! failures (connection errors, timeouts, 5xx) are retried with
//! exponential backoff up to a fixed attempt count; 4xx responses, a
//! non-image content type, an oversized body and undecodable bytes fail
//! immediately. Nothing is cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::DynamicImage;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::Semaphore;

use crate::error::FetchError;

/// Tunable parameters for the retry backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to
/// [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-attempt timeout covering connect, headers and body.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub max_bytes: usize,
    /// Images wider or taller than this are scaled down to fit.
    pub max_dimension: u32,
    /// Simultaneous downloads across all jobs.
    pub concurrency: usize,
    pub backoff: BackoffConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            max_bytes: 25 * 1024 * 1024,
            max_dimension: 4096,
            concurrency: 8,
            backoff: BackoffConfig::default(),
        }
    }
}

pub struct AssetFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    permits: Arc<Semaphore>,
}

impl AssetFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("client build failed: {e}"),
            })?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download and decode an image, scaling it down if it exceeds the
    /// configured maximum dimension.
    pub async fn fetch_image(&self, url: &str) -> Result<DynamicImage, FetchError> {
        let bytes = self.fetch(url).await?;
        let max = self.config.max_dimension;
        let url_owned = url.to_string();

        tokio::task::spawn_blocking(move || decode_bounded(&url_owned, &bytes, max))
            .await
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: format!("decode task failed: {e}"),
            })?
    }

    /// Download raw bytes with validation and bounded retry.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = validate_url(url)?;
        let mut delay = self.config.backoff.initial_delay;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();

            match self.attempt(&parsed).await {
                Ok(bytes) => {
                    tracing::info!(
                        url,
                        attempt,
                        bytes = bytes.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Image downloaded",
                    );
                    return Ok(bytes);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download attempt failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.config.backoff);
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(url, attempt, error = %e, "Download failed, retries exhausted");
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::error!(url, attempt, error = %e, "Download failed permanently");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transport {
                url: url.to_string(),
                message: "fetcher shut down".into(),
            })?;

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(ct) = response.headers().get(CONTENT_TYPE) {
            let ct = ct.to_str().unwrap_or_default().to_ascii_lowercase();
            if !is_image_content_type(&ct) {
                return Err(FetchError::ContentType {
                    url: url.to_string(),
                    content_type: ct,
                });
            }
        }

        let limit = self.config.max_bytes;
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|n| n > limit) {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        let mut body = Vec::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(url, e))? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            })
        }
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".into(),
        }),
    }
}

/// `image/*`, plus `application/octet-stream` which many object stores
/// send for everything; the decoder rejects non-images in that case.
fn is_image_content_type(ct: &str) -> bool {
    let mime = ct.split(';').next().unwrap_or_default().trim();
    mime.starts_with("image/") || mime == "application/octet-stream"
}

fn classify(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn decode_bounded(url: &str, bytes: &[u8], max: u32) -> Result<DynamicImage, FetchError> {
    let image = image::load_from_memory(bytes).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if image.width() > max || image.height() > max {
        tracing::info!(
            url,
            width = image.width(),
            height = image.height(),
            max,
            "Scaling oversized input down",
        );
        return Ok(image.resize(max, max, FilterType::Lanczos3));
    }
    Ok(image)
}
