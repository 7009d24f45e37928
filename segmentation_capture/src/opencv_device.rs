use crate::{
    camera::{CameraError, CameraPosition, CaptureDevice, DeviceFormat, DeviceProvider, FrameRateRange},
    config::CameraConfig,
    frame::ExposureSnapshot,
};
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio,
};
use segmentation_detector::{PixelBuffer, PixelFormat};
use std::time::Duration;

const RESOLUTIONS: [(u32, u32); 2] = [(640, 480), (1280, 720)];
const FRAME_RATES: [f64; 3] = [15.0, 30.0, 60.0];

/// A V4L2/AVFoundation/MSMF device reached through `videoio::VideoCapture`.
pub struct OpencvDevice {
    index: i32,
    position: CameraPosition,
    name: String,
    capture: Option<videoio::VideoCapture>,
    active: Option<(DeviceFormat, Duration)>,
}

impl OpencvDevice {
    pub fn new(index: i32, position: CameraPosition) -> Self {
        Self {
            index,
            position,
            name: format!("videoio:{}", index),
            capture: None,
            active: None,
        }
    }

    fn apply_format(&mut self) -> Result<(), CameraError> {
        let (Some(capture), Some((format, min_frame_duration))) = (self.capture.as_mut(), &self.active)
        else {
            return Ok(());
        };

        let fps = 1.0 / min_frame_duration.as_secs_f64();
        let settings = [
            (videoio::CAP_PROP_FRAME_WIDTH, format.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, format.height as f64),
            (videoio::CAP_PROP_FPS, fps),
        ];
        for (property, value) in settings {
            let accepted = capture
                .set(property, value)
                .map_err(|e| CameraError::ConfigurationFailed(e.to_string()))?;
            if !accepted {
                tracing::debug!("{} ignored property {} = {}", self.name, property, value);
            }
        }
        Ok(())
    }

    fn property(&self, property: i32) -> Option<f64> {
        self.capture.as_ref()?.get(property).ok()
    }
}

impl CaptureDevice for OpencvDevice {
    fn position(&self) -> CameraPosition {
        self.position
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// videoio cannot enumerate modes, so the common ones are offered and the
    /// backend picks the closest it supports.
    fn formats(&self) -> Vec<DeviceFormat> {
        RESOLUTIONS
            .iter()
            .flat_map(|&(width, height)| {
                FRAME_RATES.iter().map(move |&max_fps| DeviceFormat {
                    width,
                    height,
                    frame_rate_ranges: vec![FrameRateRange {
                        min_fps: 1.0,
                        max_fps,
                    }],
                })
            })
            .collect()
    }

    fn set_active_format(
        &mut self,
        format: &DeviceFormat,
        min_frame_duration: Duration,
        _max_frame_duration: Duration,
    ) -> Result<(), CameraError> {
        self.active = Some((format.clone(), min_frame_duration));
        self.apply_format()
    }

    fn open(&mut self) -> Result<(), CameraError> {
        if self.capture.is_none() {
            let capture = videoio::VideoCapture::new(self.index, videoio::CAP_ANY)
                .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))?;
            let opened = capture
                .is_opened()
                .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))?;
            if !opened {
                return Err(CameraError::OpenCameraFailed(format!(
                    "device {} could not be opened",
                    self.index
                )));
            }
            self.capture = Some(capture);
        }
        self.apply_format()
    }

    fn read_frame(&mut self) -> Result<Option<PixelBuffer>, CameraError> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };

        let mut frame = Mat::default();
        let grabbed = capture
            .read(&mut frame)
            .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }

        pixel_buffer_from_mat(frame).map(Some)
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("Failed to release {}: {}", self.name, e);
            }
        }
    }

    fn exposure(&self) -> ExposureSnapshot {
        let mut snapshot = ExposureSnapshot::default();
        if let Some(iso) = self.property(videoio::CAP_PROP_ISO_SPEED).filter(|v| *v > 0.0) {
            snapshot.iso = iso as f32;
        }
        // Most backends report exposure as log2 of seconds.
        if let Some(exposure) = self.property(videoio::CAP_PROP_EXPOSURE).filter(|v| *v < 0.0) {
            snapshot.shutter_speed = Duration::from_secs_f64(exposure.exp2());
        }
        if let Some(gain) = self.property(videoio::CAP_PROP_GAIN) {
            snapshot.exposure_bias = gain as f32;
        }
        snapshot
    }

    fn has_torch(&self) -> bool {
        false
    }

    fn set_torch(&mut self, _on: bool) -> Result<(), CameraError> {
        Err(CameraError::TorchFailed(format!("{} has no torch", self.name)))
    }
}

/// Copies an 8-bit BGR, BGRA or gray frame into a packed pixel buffer. Any
/// other element type is rejected.
fn pixel_buffer_from_mat(frame: Mat) -> Result<PixelBuffer, CameraError> {
    let (pixel_format, bytes_per_pixel) = match frame.typ() {
        core::CV_8UC3 => (PixelFormat::Bgr24, 3),
        core::CV_8UC4 => (PixelFormat::Bgra32, 4),
        core::CV_8UC1 => (PixelFormat::OneComponent8, 1),
        other => {
            return Err(CameraError::ReadFrameFailed(format!(
                "unsupported frame type {} with {} channels",
                other,
                frame.channels()
            )))
        }
    };

    let frame = if frame.is_continuous() {
        frame
    } else {
        frame
            .try_clone()
            .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?
    };
    let width = frame.cols() as u32;
    let height = frame.rows() as u32;
    let data = frame
        .data_bytes()
        .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?
        .to_vec();

    PixelBuffer::from_raw(width, height, width as usize * bytes_per_pixel, pixel_format, data)
        .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))
}

/// Devices named by index in the camera configuration.
pub struct OpencvProvider {
    back_index: i32,
    front_index: Option<i32>,
}

impl OpencvProvider {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            back_index: config.back_device_index,
            front_index: config.front_device_index,
        }
    }
}

impl DeviceProvider for OpencvProvider {
    fn discover(&self) -> Result<Vec<Box<dyn CaptureDevice>>, CameraError> {
        let mut devices: Vec<Box<dyn CaptureDevice>> =
            vec![Box::new(OpencvDevice::new(self.back_index, CameraPosition::Back))];
        if let Some(index) = self.front_index {
            devices.push(Box::new(OpencvDevice::new(index, CameraPosition::Front)));
        }
        Ok(devices)
    }
}
