use segmentation_detector::PixelBuffer;
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Decoded, straight-alpha image ready to be shown.
pub type DisplayImage = image::RgbaImage;

/// Device exposure parameters read when a frame was captured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureSnapshot {
    pub iso: f32,
    pub shutter_speed: Duration,
    pub exposure_bias: f32,
}

impl Default for ExposureSnapshot {
    fn default() -> Self {
        Self {
            iso: 0.0,
            shutter_speed: Duration::from_secs_f64(1.0 / 30.0),
            exposure_bias: 0.0,
        }
    }
}

/// Rotation applied to sensor frames before they are decoded for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Up,
    /// Rotated 90 degrees clockwise.
    Right,
    Down,
    /// Rotated 90 degrees counter-clockwise.
    Left,
}

/// One captured frame. Cheap to clone; the pixel data is shared.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub raw: Arc<PixelBuffer>,
    pub image: Arc<DisplayImage>,
    pub exposure: ExposureSnapshot,
}

impl Frame {
    pub fn new(sequence: u64, raw: PixelBuffer, image: DisplayImage, exposure: ExposureSnapshot) -> Self {
        Self {
            sequence,
            timestamp_ms: now_ms(),
            raw: Arc::new(raw),
            image: Arc::new(image),
            exposure,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Receives every captured frame, in capture order.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, frame: Frame);
}
