use crate::crop::CropScalePolicy;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    #[serde(default)]
    pub crop_scale: CropScalePolicy,
    /// Probability above which a single-channel output counts as foreground.
    /// When unset the probability itself is written to the mask.
    #[serde(default)]
    pub mask_threshold: Option<f32>,
}

fn default_input_size() -> u32 {
    224
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(format!(
                "Invalid model input size {}x{}",
                self.input_width, self.input_height
            ));
        }
        if let Some(threshold) = self.mask_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(format!("Mask threshold {} is outside [0, 1]", threshold));
            }
        }
        Ok(())
    }
}
