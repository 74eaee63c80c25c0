#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::routing::get as route_get;
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::net::TcpListener;
use tower::ServiceExt;

use designlift_api::app::build_app;
use designlift_api::config::ServerConfig;
use designlift_api::state::AppState;
use designlift_gemini::{GeminiError, InlineImage};
use designlift_models::{
    DesignExtractor, InferenceBackend, ModelError, ModelKind, ModelLoader, ModelRegistry,
    ModelSpec, Tensor,
};
use designlift_pipeline::{AssetFetcher, ConcurrencyLimiter, OutputWriter, PipelineExecutor};

pub const BASE_URL: &str = "http://testserver/outputs";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

pub struct EchoExtractor;

#[async_trait]
impl DesignExtractor for EchoExtractor {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn extract(&self, png: &[u8]) -> Result<InlineImage, GeminiError> {
        Ok(InlineImage {
            mime_type: "image/png".into(),
            data: png.to_vec(),
        })
    }
}

/// Segmentation: all foreground. Upscale: nearest 4x.
pub struct FakeBackend(ModelKind);

impl InferenceBackend for FakeBackend {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let (c, h, w) = input.chw()?;
        if self.0 == ModelKind::Segmentation {
            return Tensor::new(vec![1, 1, h, w], vec![10.0; h * w]);
        }
        let mut data = Vec::with_capacity(c * h * w * 16);
        for ch in 0..c {
            for y in 0..h * 4 {
                for x in 0..w * 4 {
                    data.push(input.data[ch * h * w + (y / 4) * w + x / 4]);
                }
            }
        }
        Tensor::new(vec![1, c, h * 4, w * 4], data)
    }
}

pub struct FakeLoader;

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        Ok(Arc::new(FakeBackend(spec.kind)))
    }
}

// ---------------------------------------------------------------------------
// Image server
// ---------------------------------------------------------------------------

fn png() -> Vec<u8> {
    let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Serve `/front.png` and `/back.png`; anything else is 404.
pub async fn spawn_image_server() -> String {
    let bytes = png();
    let serve = move || {
        let bytes = bytes.clone();
        async move { ([(CONTENT_TYPE, "image/png")], bytes) }
    };
    let router = Router::new()
        .route("/front.png", route_get(serve.clone()))
        .route("/back.png", route_get(serve));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub registry: Arc<ModelRegistry>,
    pub output_dir: tempfile::TempDir,
}

/// Build a test `ServerConfig` pointing at `output_dir`.
pub fn test_config(output_dir: &std::path::Path) -> ServerConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("GEMINI_API_KEY", "test-key".to_string()),
        ("OUTPUT_DIR", output_dir.display().to_string()),
        ("BASE_URL", BASE_URL.to_string()),
        ("DEVICE", "cpu".to_string()),
        ("DOWNLOAD_TIMEOUT_SECS", "5".to_string()),
        ("JOB_TIMEOUT_SECS", "30".to_string()),
    ]);
    ServerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
}

/// Build the full application with fake models. With `ready` the registry
/// is initialized before returning.
pub async fn build_test_app(ready: bool) -> TestApp {
    let output_dir = tempfile::tempdir().unwrap();
    let config = test_config(output_dir.path());

    let registry = Arc::new(ModelRegistry::new(
        config.registry.clone(),
        Arc::new(EchoExtractor),
        Arc::new(FakeLoader),
    ));
    if ready {
        registry.initialize().await.unwrap();
    }

    let executor = PipelineExecutor::new(
        Arc::clone(&registry),
        Arc::new(AssetFetcher::new(config.fetch.clone()).unwrap()),
        Arc::new(ConcurrencyLimiter::new(&config.limiter)),
        Arc::new(OutputWriter::new(config.writer.clone()).unwrap()),
        config.executor.clone(),
    );

    let state = AppState {
        executor: Arc::new(executor),
        registry: Arc::clone(&registry),
        config: Arc::new(config),
    };

    TestApp {
        router: build_app(state),
        registry,
        output_dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: String) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
