use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::InferenceBackend;
use crate::error::ModelError;
use crate::spec::ModelSpec;

/// Turns a [`ModelSpec`] into a ready-to-run backend.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>, ModelError>;
}
