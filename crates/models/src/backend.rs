//! Local inference seam.
//!
//! A backend is a loaded network that maps one dense `f32` tensor to
//! another. Calls are synchronous and CPU/GPU-bound; async callers run
//! them on the blocking pool.

use crate::error::ModelError;

/// Dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::Shape {
                expected: format!("{expected} elements for {shape:?}"),
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Interpret as NCHW with batch 1, returning `(c, h, w)`.
    pub fn chw(&self) -> Result<(usize, usize, usize), ModelError> {
        match self.shape.as_slice() {
            [1, c, h, w] => Ok((*c, *h, *w)),
            [c, h, w] => Ok((*c, *h, *w)),
            _ => Err(ModelError::Shape {
                expected: "[1, C, H, W]".into(),
                actual: self.shape.clone(),
            }),
        }
    }
}

/// A loaded network. Implementations must be safe to share across tasks;
/// weights are never mutated after load.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, input: &Tensor) -> Result<Tensor, ModelError>;
}
