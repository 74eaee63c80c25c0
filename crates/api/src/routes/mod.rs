pub mod health;
pub mod info;
pub mod process;

use axum::Router;

use crate::state::AppState;

/// All JSON routes.
///
/// ```text
/// GET   /          service info
/// GET   /health    readiness probe
/// POST  /process   run a front/back job
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(info::router())
        .merge(health::router())
        .merge(process::router())
}
