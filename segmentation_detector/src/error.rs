use crate::{buffer::PixelBufferError, model_service::ModelError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Inference failed: {0}")]
    Inference(#[from] ModelError),
    #[error("Failed to prepare model input: {0}")]
    Preprocess(#[from] PixelBufferError),
    /// The model returned something its construction rules out. Not recoverable.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Detector worker is not running")]
    WorkerStopped,
}

impl DetectorError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DetectorError::InvariantViolation(_))
    }
}
