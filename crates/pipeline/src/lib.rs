//! Image pipeline: fetch, extract, segment, upscale, persist.
//!
//! [`executor::PipelineExecutor`] drives the two images of a job through
//! the stages concurrently. GPU-bound stages are admitted through the
//! [`limiter::ConcurrencyLimiter`]; finished images are written by the
//! [`writer::OutputWriter`].

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod limiter;
pub mod payload;
pub mod refine;
pub mod stages;
pub mod writer;

pub use error::{FetchError, LimiterError, StageError, WriteError};
pub use executor::{ExecutorConfig, PipelineExecutor};
pub use fetcher::{AssetFetcher, BackoffConfig, FetchConfig};
pub use limiter::{ConcurrencyLimiter, LedgerSnapshot, LimiterConfig, SlotPermit};
pub use payload::ImagePayload;
pub use stages::Stage;
pub use writer::{JobArtifacts, OutputWriter, PurgeGuard, WriterConfig};
