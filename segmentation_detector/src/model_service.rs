use crate::buffer::PixelBuffer;
use ndarray::ArrayD;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid model input: {0}")]
    InvalidInput(String),
    #[error("Model execution failed: {0}")]
    Execution(String),
}

/// One result produced by a model run.
#[derive(Debug, Clone)]
pub enum Observation {
    /// A per-pixel output image, e.g. a segmentation mask.
    PixelBuffer(PixelBuffer),
    /// A raw output tensor the runtime could not interpret as an image.
    Tensor(ArrayD<f32>),
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::PixelBuffer(_) => "pixel buffer",
            Observation::Tensor(_) => "tensor",
        }
    }
}

/// A loaded segmentation model. `run` blocks and is only ever called from the
/// detector's worker thread.
pub trait SegmentationModel: Send + 'static {
    /// Spatial size `(width, height)` the model expects its input in.
    fn input_size(&self) -> (u32, u32);

    fn run(&mut self, input: &PixelBuffer) -> Result<Vec<Observation>, ModelError>;
}
