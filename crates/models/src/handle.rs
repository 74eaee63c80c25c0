use std::sync::Arc;

use designlift_core::types::{Device, Precision};

use crate::backend::InferenceBackend;
use crate::error::ModelError;
use crate::extractor::DesignExtractor;
use crate::spec::ModelKind;

/// How a handle reaches its model.
#[derive(Clone)]
pub enum ModelBackend {
    Remote(Arc<dyn DesignExtractor>),
    Local(Arc<dyn InferenceBackend>),
}

/// A model plus its placement.
///
/// A handle is ready once a backend is bound. The registry binds every
/// backend before it publishes any handle, so handles obtained from
/// [`ModelRegistry::handle`](crate::ModelRegistry::handle) are always
/// ready and read-only.
#[derive(Clone)]
pub struct ModelHandle {
    pub kind: ModelKind,
    pub name: String,
    pub device: Device,
    pub precision: Precision,
    backend: Option<ModelBackend>,
}

impl ModelHandle {
    pub fn new(
        kind: ModelKind,
        name: impl Into<String>,
        device: Device,
        precision: Precision,
        backend: ModelBackend,
    ) -> Self {
        let mut handle = Self::unloaded(kind, name, device, precision);
        handle.bind(backend);
        handle
    }

    /// A handle whose model has not been loaded yet.
    pub fn unloaded(
        kind: ModelKind,
        name: impl Into<String>,
        device: Device,
        precision: Precision,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            device,
            precision,
            backend: None,
        }
    }

    /// Attach the loaded model. The handle is ready afterwards.
    pub fn bind(&mut self, backend: ModelBackend) {
        self.backend = Some(backend);
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn local(&self) -> Result<&Arc<dyn InferenceBackend>, ModelError> {
        match &self.backend {
            Some(ModelBackend::Local(b)) => Ok(b),
            Some(ModelBackend::Remote(_)) => Err(ModelError::WrongBackend {
                kind: self.kind,
                expected: "local",
            }),
            None => Err(ModelError::NotReady),
        }
    }

    pub fn remote(&self) -> Result<&Arc<dyn DesignExtractor>, ModelError> {
        match &self.backend {
            Some(ModelBackend::Remote(e)) => Ok(e),
            Some(ModelBackend::Local(_)) => Err(ModelError::WrongBackend {
                kind: self.kind,
                expected: "remote",
            }),
            None => Err(ModelError::NotReady),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("device", &self.device)
            .field("precision", &self.precision)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
