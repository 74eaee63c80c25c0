#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use designlift_core::types::Device;
use designlift_gemini::{GeminiError, InlineImage};
use designlift_models::{
    DesignExtractor, InferenceBackend, ModelError, ModelKind, ModelLoader, ModelRegistry,
    ModelSpec, RegistryConfig, SegmentationVariant, Tensor,
};
use designlift_pipeline::{
    AssetFetcher, BackoffConfig, ConcurrencyLimiter, ExecutorConfig, FetchConfig, LimiterConfig,
    OutputWriter, PipelineExecutor, WriterConfig,
};

pub const BASE_URL: &str = "https://cdn.test/outputs";
pub const INPUT_SIZE: u32 = 32;

// ---------------------------------------------------------------------------
// Image fixture server
// ---------------------------------------------------------------------------

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub struct FixtureState {
    pub hits: AtomicUsize,
    flaky_calls: AtomicUsize,
    flaky_failures: usize,
    png: Vec<u8>,
    /// Releases `/gated-missing.png`.
    pub gate: Notify,
}

pub struct Fixture {
    pub base: String,
    pub state: Arc<FixtureState>,
}

impl Fixture {
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn serve_png(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    ([(CONTENT_TYPE, "image/png")], s.png.clone()).into_response()
}

async fn missing(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND.into_response()
}

async fn slow_missing(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    StatusCode::NOT_FOUND.into_response()
}

async fn gated_missing(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    s.gate.notified().await;
    StatusCode::NOT_FOUND.into_response()
}

async fn flaky(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    if s.flaky_calls.fetch_add(1, Ordering::SeqCst) < s.flaky_failures {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ([(CONTENT_TYPE, "image/png")], s.png.clone()).into_response()
}

async fn unavailable(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}

async fn html(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    ([(CONTENT_TYPE, "text/html")], "<html></html>").into_response()
}

async fn huge(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    ([(CONTENT_TYPE, "image/png")], vec![0u8; 10_000]).into_response()
}

async fn stalled(State(s): State<Arc<FixtureState>>) -> Response {
    s.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    ([(CONTENT_TYPE, "image/png")], s.png.clone()).into_response()
}

/// Serve the test images on an ephemeral port. `/flaky.png` answers 503
/// `flaky_failures` times before succeeding; `/gated-missing.png` answers
/// 404 once `state.gate` is notified.
pub async fn spawn_fixture(flaky_failures: usize) -> Fixture {
    let state = Arc::new(FixtureState {
        hits: AtomicUsize::new(0),
        flaky_calls: AtomicUsize::new(0),
        flaky_failures,
        png: png_bytes(INPUT_SIZE, INPUT_SIZE),
        gate: Notify::new(),
    });
    let router = Router::new()
        .route("/front.png", get(serve_png))
        .route("/back.png", get(serve_png))
        .route("/missing.png", get(missing))
        .route("/slow-missing.png", get(slow_missing))
        .route("/gated-missing.png", get(gated_missing))
        .route("/flaky.png", get(flaky))
        .route("/unavailable.png", get(unavailable))
        .route("/page.html", get(html))
        .route("/huge.png", get(huge))
        .route("/stalled.png", get(stalled))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Fixture {
        base: format!("http://{addr}"),
        state,
    }
}

pub fn fetch_config() -> FetchConfig {
    fetch_config_with_timeout(Duration::from_secs(2))
}

pub fn fetch_config_with_timeout(timeout: Duration) -> FetchConfig {
    FetchConfig {
        timeout,
        max_attempts: 3,
        max_bytes: 1024 * 1024,
        max_dimension: 4096,
        concurrency: 8,
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        },
    }
}

// ---------------------------------------------------------------------------
// Fake models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum ExtractorMode {
    /// Return the input unchanged.
    Echo,
    /// Fail as if the remote call timed out.
    Fail,
    /// Sleep, then echo.
    Slow(Duration),
}

pub struct FakeExtractor {
    pub mode: ExtractorMode,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(mode: ExtractorMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DesignExtractor for FakeExtractor {
    fn model_name(&self) -> &str {
        "fake-extractor"
    }

    async fn extract(&self, png: &[u8]) -> Result<InlineImage, GeminiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ExtractorMode::Echo => {}
            ExtractorMode::Fail => return Err(GeminiError::Timeout(Duration::from_secs(90))),
            ExtractorMode::Slow(delay) => tokio::time::sleep(delay).await,
        }
        Ok(InlineImage {
            mime_type: "image/png".into(),
            data: png.to_vec(),
        })
    }
}

/// Tracks how many inference calls run at once across all fake backends.
#[derive(Default)]
pub struct Occupancy {
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Confident foreground everywhere: `[1, 1, H, W]` logits of 10.
pub struct FakeSegmentation {
    delay: Duration,
    occupancy: Arc<Occupancy>,
}

impl InferenceBackend for FakeSegmentation {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.occupancy.enter();
        std::thread::sleep(self.delay);
        let (_, h, w) = input.chw()?;
        self.occupancy.exit();
        Tensor::new(vec![1, 1, h, w], vec![10.0; h * w])
    }
}

/// Nearest-neighbour 4x enlargement.
pub struct FakeUpscale {
    delay: Duration,
    occupancy: Arc<Occupancy>,
}

impl InferenceBackend for FakeUpscale {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.occupancy.enter();
        std::thread::sleep(self.delay);
        let (c, h, w) = input.chw()?;
        let (oh, ow) = (h * 4, w * 4);
        let mut data = Vec::with_capacity(c * oh * ow);
        for ch in 0..c {
            for y in 0..oh {
                for x in 0..ow {
                    data.push(input.data[ch * h * w + (y / 4) * w + x / 4]);
                }
            }
        }
        self.occupancy.exit();
        Tensor::new(vec![1, c, oh, ow], data)
    }
}

pub struct FakeLoader {
    pub seg_delay: Duration,
    pub upscale_delay: Duration,
    pub occupancy: Arc<Occupancy>,
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        let occupancy = Arc::clone(&self.occupancy);
        Ok(match spec.kind {
            ModelKind::Upscale => Arc::new(FakeUpscale {
                delay: self.upscale_delay,
                occupancy,
            }),
            _ => Arc::new(FakeSegmentation {
                delay: self.seg_delay,
                occupancy,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Executor harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub executor: PipelineExecutor,
    pub registry: Arc<ModelRegistry>,
    pub extractor: Arc<FakeExtractor>,
    pub occupancy: Arc<Occupancy>,
    pub output_dir: tempfile::TempDir,
}

pub struct HarnessOptions {
    pub extractor: ExtractorMode,
    pub initialize: bool,
    pub slots: usize,
    pub acquire_timeout: Duration,
    pub job_timeout: Duration,
    pub seg_delay: Duration,
    pub upscale_delay: Duration,
    pub fetch_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            extractor: ExtractorMode::Echo,
            initialize: true,
            slots: 2,
            acquire_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(30),
            seg_delay: Duration::ZERO,
            upscale_delay: Duration::ZERO,
            fetch_timeout: Duration::from_secs(2),
        }
    }
}

pub async fn harness(opts: HarnessOptions) -> Harness {
    let occupancy = Arc::new(Occupancy::default());
    let extractor = Arc::new(FakeExtractor::new(opts.extractor));
    let loader = Arc::new(FakeLoader {
        seg_delay: opts.seg_delay,
        upscale_delay: opts.upscale_delay,
        occupancy: Arc::clone(&occupancy),
    });
    let registry = Arc::new(ModelRegistry::new(
        RegistryConfig {
            model_dir: PathBuf::from("/models"),
            segmentation: SegmentationVariant::BiRefNet,
            device: Device::Cpu,
            use_half: false,
        },
        extractor.clone(),
        loader,
    ));
    if opts.initialize {
        registry.initialize().await.unwrap();
    }

    let output_dir = tempfile::tempdir().unwrap();
    let writer = OutputWriter::new(WriterConfig {
        output_dir: output_dir.path().to_path_buf(),
        base_url: BASE_URL.to_string(),
        debug_images: false,
    })
    .unwrap();
    let limiter = ConcurrencyLimiter::new(&LimiterConfig {
        concurrency: opts.slots,
        vram_total_mb: None,
        vram_per_worker_mb: None,
        acquire_timeout: opts.acquire_timeout,
    });

    let executor = PipelineExecutor::new(
        Arc::clone(&registry),
        Arc::new(AssetFetcher::new(fetch_config_with_timeout(opts.fetch_timeout)).unwrap()),
        Arc::new(limiter),
        Arc::new(writer),
        ExecutorConfig {
            job_timeout: opts.job_timeout,
        },
    );

    Harness {
        executor,
        registry,
        extractor,
        occupancy,
        output_dir,
    }
}

/// Final artifacts in `dir`. Temporary files never end in `.png`.
pub fn pngs_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".png"))
        .collect();
    names.sort();
    names
}

/// Poll until `path` exists. Returns false if `limit` elapses first.
pub async fn wait_for_file(path: &Path, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if path.is_file() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    path.is_file()
}
