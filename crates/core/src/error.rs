use crate::job::ImageStage;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: ImageStage, to: ImageStage },

    #[error("Internal error: {0}")]
    Internal(String),
}
