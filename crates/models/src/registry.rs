//! Process-wide Model Registry.
//!
//! Built once at startup and shared behind an `Arc`. [`initialize`]
//! loads every model exactly once; concurrent and repeated calls observe
//! the outcome of the first. The readiness flag flips only after all
//! models are loaded and never flips back.
//!
//! [`initialize`]: ModelRegistry::initialize

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;

use designlift_core::types::{Device, Precision};

use crate::error::ModelError;
use crate::extractor::DesignExtractor;
use crate::handle::{ModelBackend, ModelHandle};
use crate::loader::ModelLoader;
use crate::spec::{ModelKind, ModelSpec, SegmentationVariant};

/// Placement and selection settings applied uniformly to every model.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub model_dir: PathBuf,
    pub segmentation: SegmentationVariant,
    pub device: Device,
    /// Half precision was requested. Ignored on CPU.
    pub use_half: bool,
}

impl RegistryConfig {
    pub fn precision(&self) -> Precision {
        if self.use_half && self.device.is_gpu() {
            Precision::Half
        } else {
            Precision::Full
        }
    }
}

struct LoadedModels {
    extraction: Arc<ModelHandle>,
    segmentation: Arc<ModelHandle>,
    upscale: Arc<ModelHandle>,
}

pub struct ModelRegistry {
    config: RegistryConfig,
    extractor: Arc<dyn DesignExtractor>,
    loader: Arc<dyn ModelLoader>,
    models: OnceCell<Result<LoadedModels, String>>,
    ready: AtomicBool,
}

impl ModelRegistry {
    pub fn new(
        config: RegistryConfig,
        extractor: Arc<dyn DesignExtractor>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            config,
            extractor,
            loader,
            models: OnceCell::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// `true` once every model has loaded. Never reverts.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn segmentation_variant(&self) -> SegmentationVariant {
        self.config.segmentation
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Load all models. Runs the load at most once per registry.
    pub async fn initialize(&self) -> Result<(), ModelError> {
        let outcome = self.models.get_or_init(|| self.load_all()).await;
        match outcome {
            Ok(_) => {
                self.ready.store(true, Ordering::Release);
                Ok(())
            }
            Err(message) => Err(ModelError::InitFailed(message.clone())),
        }
    }

    /// Shared handle for `kind`, or [`ModelError::NotReady`] before
    /// initialization succeeds.
    pub fn handle(&self, kind: ModelKind) -> Result<Arc<ModelHandle>, ModelError> {
        if !self.is_ready() {
            return Err(ModelError::NotReady);
        }
        let Some(Ok(models)) = self.models.get() else {
            return Err(ModelError::NotReady);
        };
        Ok(Arc::clone(match kind {
            ModelKind::Extraction => &models.extraction,
            ModelKind::Segmentation => &models.segmentation,
            ModelKind::Upscale => &models.upscale,
        }))
    }

    // ---- loading ----

    async fn load_all(&self) -> Result<LoadedModels, String> {
        let started = Instant::now();
        tracing::info!(
            device = %self.config.device,
            precision = %self.config.precision(),
            segmentation = %self.config.segmentation,
            "Starting model initialization",
        );

        match self.load_all_inner().await {
            Ok(models) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "All models initialized",
                );
                Ok(models)
            }
            Err(e) => {
                tracing::error!(error = %e, "Model initialization failed");
                Err(e.to_string())
            }
        }
    }

    async fn load_all_inner(&self) -> Result<LoadedModels, ModelError> {
        let precision = self.config.precision();
        if self.config.use_half && precision == Precision::Full {
            tracing::warn!(device = %self.config.device, "Half precision unsupported on CPU, using fp32");
        }

        // Extraction first: it is a remote client, so this only binds the
        // shared client into a handle.
        let extraction = ModelHandle::new(
            ModelKind::Extraction,
            self.extractor.model_name(),
            Device::Cpu,
            Precision::Full,
            ModelBackend::Remote(Arc::clone(&self.extractor)),
        );
        tracing::info!(model = %extraction.name, "Extraction client ready");

        let seg_spec = ModelSpec::segmentation(
            &self.config.model_dir,
            self.config.segmentation,
            self.config.device,
            precision,
        );
        let up_spec = ModelSpec::upscale(&self.config.model_dir, self.config.device, precision);

        let (segmentation, upscale) =
            tokio::try_join!(self.load_local(&seg_spec), self.load_local(&up_spec))?;

        Ok(LoadedModels {
            extraction: Arc::new(extraction),
            segmentation: Arc::new(segmentation),
            upscale: Arc::new(upscale),
        })
    }

    async fn load_local(&self, spec: &ModelSpec) -> Result<ModelHandle, ModelError> {
        let started = Instant::now();
        tracing::info!(kind = %spec.kind, model = %spec.name, weights = %spec.weights.display(), "Loading model");

        let mut handle =
            ModelHandle::unloaded(spec.kind, spec.name.clone(), spec.device, spec.precision);
        handle.bind(ModelBackend::Local(self.loader.load(spec).await?));

        tracing::info!(
            kind = %spec.kind,
            model = %spec.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded",
        );
        Ok(handle)
    }
}
