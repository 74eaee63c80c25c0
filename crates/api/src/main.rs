use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use designlift_api::app::build_app;
use designlift_api::config::{LogFormat, ServerConfig};
use designlift_api::state::AppState;
use designlift_gemini::GeminiClient;
use designlift_models::onnx::OnnxLoader;
use designlift_models::ModelRegistry;
use designlift_pipeline::{AssetFetcher, ConcurrencyLimiter, OutputWriter, PipelineExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;

    // --- Tracing ---
    init_tracing(&config);
    tracing::info!(
        host = %config.host,
        port = config.port,
        device = %config.registry.device,
        segmentation = %config.registry.segmentation,
        gpu_slots = config.limiter.effective_slots(),
        "Loaded server configuration",
    );

    // --- Models ---
    let extractor = Arc::new(
        GeminiClient::new(config.gemini.clone()).context("Failed to build Gemini client")?,
    );
    let mut loader = OnnxLoader::new();
    if let Some(threads) = config.onnx_threads {
        loader = loader.with_intra_threads(threads);
    }
    let registry = Arc::new(ModelRegistry::new(
        config.registry.clone(),
        extractor,
        Arc::new(loader),
    ));

    // --- Pipeline ---
    let fetcher = AssetFetcher::new(config.fetch.clone()).context("Failed to build HTTP client")?;
    let writer = OutputWriter::new(config.writer.clone()).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.writer.output_dir.display()
        )
    })?;
    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&registry),
        Arc::new(fetcher),
        Arc::new(ConcurrencyLimiter::new(&config.limiter)),
        Arc::new(writer),
        config.executor.clone(),
    ));

    // --- App state ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let state = AppState {
        executor: Arc::clone(&executor),
        registry: Arc::clone(&registry),
        config: Arc::new(config),
    };
    let app = build_app(state);

    // --- Start server ---
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, "Listening");

    // Models load after the listener is up so /health can report progress.
    // A load failure is fatal: the process could never become ready.
    tokio::spawn(async move {
        if let Err(e) = registry.initialize().await {
            tracing::error!(error = %e, "Model initialization failed, exiting");
            std::process::exit(1);
        }
        tracing::info!("Service ready");
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&executor)))
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` applies to this
/// service's crates and the HTTP layer.
fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        format!(
            "designlift_api={level},designlift_pipeline={level},designlift_models={level},\
             designlift_gemini={level},tower_http={level}"
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for SIGINT or SIGTERM, then cancel running jobs so in-flight
/// requests answer promptly instead of holding the shutdown open.
async fn shutdown_signal(executor: Arc<PipelineExecutor>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }

    executor.shutdown();
}
