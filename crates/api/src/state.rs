use std::sync::Arc;

use designlift_models::ModelRegistry;
use designlift_pipeline::PipelineExecutor;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<PipelineExecutor>,
    /// Readiness source for `/health`.
    pub registry: Arc<ModelRegistry>,
    pub config: Arc<ServerConfig>,
}
