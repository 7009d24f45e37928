mod buffer;
mod crop;
mod detector;
mod error;
mod model_service;
#[cfg(feature = "onnx")]
mod ort_service;
mod tensor;

pub mod config;

pub use buffer::{PixelBuffer, PixelBufferError, PixelFormat};
pub use crop::CropScalePolicy;
pub use detector::{Completion, DetectResult, Detector, InferenceEngine};
pub use error::DetectorError;
pub use model_service::{ModelError, Observation, SegmentationModel};
#[cfg(feature = "onnx")]
pub use ort_service::OrtSegmentationModel;
