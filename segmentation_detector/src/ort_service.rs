use crate::{
    buffer::PixelBuffer,
    config::ModelConfig,
    model_service::{ModelError, Observation, SegmentationModel},
    tensor::{buffer_to_tensor, mask_from_output},
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

/// A segmentation network loaded through ONNX Runtime.
pub struct OrtSegmentationModel {
    session: Session,
    input_size: (u32, u32),
    output_name: String,
    mask_threshold: Option<f32>,
}

impl OrtSegmentationModel {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_config.get_path())?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or("model declares no outputs")?;

        tracing::info!(
            "Loaded ONNX model {:?} with output {}",
            model_config.get_path(),
            output_name
        );

        Ok(Self {
            session,
            input_size: (model_config.input_width, model_config.input_height),
            output_name,
            mask_threshold: model_config.mask_threshold,
        })
    }
}

impl SegmentationModel for OrtSegmentationModel {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn run(&mut self, input: &PixelBuffer) -> Result<Vec<Observation>, ModelError> {
        let input = buffer_to_tensor(input)?;

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::InvalidInput(format!("failed to build tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Execution(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Execution(format!("failed to extract tensor: {}", e)))?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Execution(format!("invalid tensor shape: {}", e)))?;

        Ok(vec![mask_from_output(array, self.mask_threshold)?])
    }
}
