use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use designlift_core::types::Device;
use designlift_gemini::GeminiConfig;
use designlift_models::{RegistryConfig, SegmentationVariant};
use designlift_pipeline::{
    BackoffConfig, ExecutorConfig, FetchConfig, LimiterConfig, WriterConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration loaded from environment variables.
///
/// Everything except `GEMINI_API_KEY` has a default suitable for a single
/// GPU host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outer HTTP timeout, above the job deadline.
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    /// ONNX Runtime intra-op threads; runtime default when unset.
    pub onnx_threads: Option<usize>,
    pub gemini: GeminiConfig,
    pub registry: RegistryConfig,
    pub fetch: FetchConfig,
    pub limiter: LimiterConfig,
    pub writer: WriterConfig,
    pub executor: ExecutorConfig,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default                                            |
    /// |----------------------------|----------------------------------------------------|
    /// | `HOST` / `PORT`            | `0.0.0.0` / `8001`                                 |
    /// | `GEMINI_API_KEY`           | required                                           |
    /// | `GEMINI_API_URL`           | `https://generativelanguage.googleapis.com/v1beta` |
    /// | `GEMINI_MODEL_NAME`        | `gemini-2.5-flash-image`                           |
    /// | `GEMINI_TEMPERATURE`       | `0.4`                                              |
    /// | `GEMINI_TIMEOUT_SECS`      | `90`                                               |
    /// | `BASE_URL`                 | `http://localhost:8001/outputs`                    |
    /// | `OUTPUT_DIR`               | `outputs`                                          |
    /// | `MODEL_DIR`                | `/models`                                          |
    /// | `SEGMENTATION_MODEL`       | `birefnet`                                         |
    /// | `DEVICE`                   | `cuda`                                             |
    /// | `USE_FP16`                 | `true`                                             |
    /// | `GPU_CONCURRENCY`          | `2`                                                |
    /// | `VRAM_TOTAL_MB`            | unset                                              |
    /// | `VRAM_PER_WORKER_MB`       | unset                                              |
    /// | `GPU_ACQUIRE_TIMEOUT_SECS` | `60`                                               |
    /// | `JOB_TIMEOUT_SECS`         | `180`                                              |
    /// | `REQUEST_TIMEOUT_SECS`     | `300`                                              |
    /// | `DOWNLOAD_TIMEOUT_SECS`    | `30`                                               |
    /// | `DOWNLOAD_MAX_RETRIES`     | `3`                                                |
    /// | `DOWNLOAD_MAX_BYTES`       | `26214400`                                         |
    /// | `DOWNLOAD_CONCURRENCY`     | `8`                                                |
    /// | `MAX_IMAGE_SIZE`           | `4096`                                             |
    /// | `DEBUG_SAVE_IMAGES`        | `false`                                            |
    /// | `ONNX_INTRA_THREADS`       | unset                                              |
    /// | `LOG_LEVEL` / `LOG_FORMAT` | `info` / `text`                                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let gemini = GeminiConfig {
            api_url: env.string(
                "GEMINI_API_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            api_key: env.required("GEMINI_API_KEY")?,
            model: env.string("GEMINI_MODEL_NAME", "gemini-2.5-flash-image"),
            temperature: env.parse("GEMINI_TEMPERATURE", 0.4)?,
            timeout: Duration::from_secs(env.parse("GEMINI_TIMEOUT_SECS", 90)?),
        };

        let output_dir = PathBuf::from(env.string("OUTPUT_DIR", "outputs"));
        let registry = RegistryConfig {
            model_dir: PathBuf::from(env.string("MODEL_DIR", "/models")),
            segmentation: env.parse::<SegmentationVariant>(
                "SEGMENTATION_MODEL",
                SegmentationVariant::BiRefNet,
            )?,
            device: env.parse::<Device>("DEVICE", Device::Cuda(0))?,
            use_half: env.flag("USE_FP16", true)?,
        };

        let fetch = FetchConfig {
            timeout: Duration::from_secs(env.parse("DOWNLOAD_TIMEOUT_SECS", 30)?),
            max_attempts: env.parse("DOWNLOAD_MAX_RETRIES", 3)?,
            max_bytes: env.parse("DOWNLOAD_MAX_BYTES", 25 * 1024 * 1024)?,
            max_dimension: env.parse("MAX_IMAGE_SIZE", 4096)?,
            concurrency: env.parse("DOWNLOAD_CONCURRENCY", 8)?,
            backoff: BackoffConfig::default(),
        };

        let limiter = LimiterConfig {
            concurrency: env.parse("GPU_CONCURRENCY", 2)?,
            vram_total_mb: env.optional("VRAM_TOTAL_MB")?,
            vram_per_worker_mb: env.optional("VRAM_PER_WORKER_MB")?,
            acquire_timeout: Duration::from_secs(env.parse("GPU_ACQUIRE_TIMEOUT_SECS", 60)?),
        };

        let log_format = match env.string("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected text or json".into(),
                })
            }
        };

        Ok(Self {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 8001)?,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 300)?,
            log_level: env.string("LOG_LEVEL", "info").to_ascii_lowercase(),
            log_format,
            onnx_threads: env.optional("ONNX_INTRA_THREADS")?,
            gemini,
            registry,
            fetch,
            limiter,
            writer: WriterConfig {
                output_dir,
                base_url: env.string("BASE_URL", "http://localhost:8001/outputs"),
                debug_images: env.flag("DEBUG_SAVE_IMAGES", false)?,
            },
            executor: ExecutorConfig {
                job_timeout: Duration::from_secs(env.parse("JOB_TIMEOUT_SECS", 180)?),
            },
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(var)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(var) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected a boolean".into(),
            }),
        }
    }
}
