//! Model Registry and model handles.
//!
//! The registry owns every model the pipeline needs: the remote design
//! extractor plus the local segmentation and upscaling networks. It loads
//! them once per process and exposes a single readiness flag.

pub mod backend;
pub mod error;
pub mod extractor;
pub mod handle;
pub mod loader;
pub mod registry;
pub mod spec;

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(not(feature = "onnx"))]
#[path = "onnx_stub.rs"]
pub mod onnx;

pub use backend::{InferenceBackend, Tensor};
pub use error::ModelError;
pub use extractor::DesignExtractor;
pub use handle::{ModelBackend, ModelHandle};
pub use loader::ModelLoader;
pub use registry::{ModelRegistry, RegistryConfig};
pub use spec::{ModelKind, ModelSpec, SegmentationVariant, UPSCALE_FACTOR};
