use crate::{
    config::CameraConfig,
    converter,
    frame::{DisplayImage, ExposureSnapshot, Frame, FrameObserver, Orientation},
};
use parking_lot::Mutex;
use segmentation_detector::PixelBuffer;
use serde::Deserialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::{self, JoinHandle},
    time::{interval, MissedTickBehavior},
};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No {0} camera available")]
    DeviceUnavailable(CameraPosition),
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
    #[error("Failed to configure camera: {0}")]
    ConfigurationFailed(String),
    #[error("Torch could not be used: {0}")]
    TorchFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraPosition {
    Front,
    #[default]
    Back,
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::Back => write!(f, "back"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateRange {
    pub min_fps: f64,
    pub max_fps: f64,
}

impl FrameRateRange {
    pub fn min_frame_duration(&self) -> Duration {
        fps_to_duration(self.max_fps)
    }

    pub fn max_frame_duration(&self) -> Duration {
        fps_to_duration(self.min_fps)
    }
}

fn fps_to_duration(fps: f64) -> Duration {
    if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate_ranges: Vec<FrameRateRange>,
}

/// A physical capture device.
pub trait CaptureDevice: Send {
    fn position(&self) -> CameraPosition;
    fn name(&self) -> &str;
    fn formats(&self) -> Vec<DeviceFormat>;
    fn set_active_format(
        &mut self,
        format: &DeviceFormat,
        min_frame_duration: Duration,
        max_frame_duration: Duration,
    ) -> Result<(), CameraError>;
    /// Attaches the device to the capture session.
    fn open(&mut self) -> Result<(), CameraError>;
    /// Detaches the device; it may be opened again later.
    fn close(&mut self);
    /// Reads the next frame. `Ok(None)` means no frame was ready.
    fn read_frame(&mut self) -> Result<Option<PixelBuffer>, CameraError>;
    fn exposure(&self) -> ExposureSnapshot;
    fn has_torch(&self) -> bool;
    fn set_torch(&mut self, on: bool) -> Result<(), CameraError>;
}

pub trait DeviceProvider {
    fn discover(&self) -> Result<Vec<Box<dyn CaptureDevice>>, CameraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorchOutcome {
    Applied,
    Unavailable,
    Failed,
}

struct CaptureSession {
    back: Option<Box<dyn CaptureDevice>>,
    front: Option<Box<dyn CaptureDevice>>,
    position: CameraPosition,
    running: bool,
}

impl CaptureSession {
    fn current(&mut self) -> Option<&mut (dyn CaptureDevice + 'static)> {
        self.device(self.position)
    }

    fn device(&mut self, position: CameraPosition) -> Option<&mut (dyn CaptureDevice + 'static)> {
        match position {
            CameraPosition::Back => self.back.as_deref_mut(),
            CameraPosition::Front => self.front.as_deref_mut(),
        }
    }

    fn has(&self, position: CameraPosition) -> bool {
        match position {
            CameraPosition::Back => self.back.is_some(),
            CameraPosition::Front => self.front.is_some(),
        }
    }
}

/// Continuously captures frames from the selected device and hands each one
/// to the registered observer.
pub struct Camera {
    session: Mutex<CaptureSession>,
    /// Mirrors `session.position` so readers never wait on a frame read.
    selected: Mutex<CameraPosition>,
    observer: Arc<dyn FrameObserver>,
    current_frame: Mutex<Option<Arc<DisplayImage>>>,
    sequence: AtomicU64,
    target_fps: u32,
    orientation: Orientation,
}

impl Camera {
    pub fn new(
        provider: &dyn DeviceProvider,
        config: &CameraConfig,
        observer: Arc<dyn FrameObserver>,
    ) -> Result<Self, CameraError> {
        let mut back = None;
        let mut front = None;
        for device in provider.discover()? {
            match device.position() {
                CameraPosition::Back if back.is_none() => back = Some(device),
                CameraPosition::Front if front.is_none() => front = Some(device),
                position => {
                    tracing::debug!("Ignoring additional {} camera {}", position, device.name())
                }
            }
        }

        let camera = Self {
            session: Mutex::new(CaptureSession {
                back,
                front,
                position: CameraPosition::Back,
                running: false,
            }),
            selected: Mutex::new(CameraPosition::Back),
            observer,
            current_frame: Mutex::new(None),
            sequence: AtomicU64::new(0),
            target_fps: config.target_fps,
            orientation: config.orientation,
        };

        if config.position != CameraPosition::Back {
            // A missing front camera leaves the back one selected.
            let _ = camera.configure(config.position);
        }

        Ok(camera)
    }

    pub fn position(&self) -> CameraPosition {
        *self.selected.lock()
    }

    /// Selects the front or back device. On a running session the new device
    /// is configured and attached first; the selection only changes once it
    /// is open, and the previous device is then detached.
    pub fn configure(&self, position: CameraPosition) -> Result<(), CameraError> {
        let mut session = self.session.lock();
        let previous = session.position;
        if !session.has(position) {
            tracing::error!("No {} camera available, keeping {}", position, previous);
            return Err(CameraError::DeviceUnavailable(position));
        }

        if session.running && position != previous {
            if let Some(device) = session.device(position) {
                select_frame_rate(device, self.target_fps);
                if let Err(e) = device.open() {
                    tracing::error!("Failed to attach {} camera, keeping {}: {}", position, previous, e);
                    return Err(e);
                }
            }
            if let Some(device) = session.device(previous) {
                device.close();
            }
        }

        session.position = position;
        *self.selected.lock() = position;
        tracing::info!("Selected {} camera", position);
        Ok(())
    }

    /// Attaches the selected device and spawns the capture loop.
    pub fn start(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<JoinHandle<()>, CameraError> {
        {
            let mut session = self.session.lock();
            let position = session.position;
            let Some(device) = session.current() else {
                tracing::error!("Cannot start capture: no {} camera", position);
                return Err(CameraError::DeviceUnavailable(position));
            };

            select_frame_rate(device, self.target_fps);
            if let Err(e) = device.open() {
                tracing::error!("Cannot start capture on {}: {}", device.name(), e);
                return Err(e);
            }
            session.running = true;
        }

        Ok(tokio::spawn(self.clone().capture_loop(shutdown_rx)))
    }

    /// Device reads block, so each one runs on the blocking pool.
    async fn capture_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(fps_to_duration(self.target_fps.max(1) as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let camera = self.clone();
                    if let Err(e) = task::spawn_blocking(move || camera.capture_once()).await {
                        tracing::error!("Capture task failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Camera capture received shutdown signal");
                    break;
                }
            }
        }

        {
            let mut session = self.session.lock();
            session.running = false;
            if let Some(device) = session.current() {
                device.close();
            }
        }
        tracing::info!("Camera capture stopped");
    }

    fn capture_once(&self) -> bool {
        let (raw, exposure) = {
            let mut session = self.session.lock();
            let Some(device) = session.current() else {
                return false;
            };
            match device.read_frame() {
                Ok(Some(raw)) => (raw, device.exposure()),
                Ok(None) => return false,
                Err(e) => {
                    tracing::error!("Error capturing frame: {}", e);
                    return false;
                }
            }
        };

        let image = converter::orient(converter::image_from_pixel_buffer(&raw), self.orientation);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(sequence, raw, image, exposure);

        *self.current_frame.lock() = Some(frame.image.clone());
        self.observer.on_frame(frame);
        true
    }

    /// The most recently delivered frame, decoded for display.
    pub fn current_frame(&self) -> Option<Arc<DisplayImage>> {
        self.current_frame.lock().clone()
    }

    pub fn set_torch(&self, on: bool) -> TorchOutcome {
        let mut session = self.session.lock();
        let Some(device) = session.current() else {
            tracing::info!("Torch is not available: no camera selected");
            return TorchOutcome::Unavailable;
        };

        if !device.has_torch() {
            tracing::info!("Torch is not available on {}", device.name());
            return TorchOutcome::Unavailable;
        }

        match device.set_torch(on) {
            Ok(()) => {
                tracing::info!("Torch turned {}", if on { "on" } else { "off" });
                TorchOutcome::Applied
            }
            Err(e) => {
                tracing::warn!("Torch could not be used: {}", e);
                TorchOutcome::Failed
            }
        }
    }

    pub fn log_camera_info(&self) {
        let mut session = self.session.lock();
        if let Some(device) = session.current() {
            let exposure = device.exposure();
            tracing::info!(
                camera = device.name(),
                iso = exposure.iso,
                shutter_speed_s = exposure.shutter_speed.as_secs_f64(),
                exposure_bias = exposure.exposure_bias,
                "Camera parameters"
            );
        }
    }
}

/// Activates the last format whose first frame-rate range tops out at
/// `target_fps`, locking the frame duration to that range.
fn select_frame_rate(device: &mut dyn CaptureDevice, target_fps: u32) -> Option<DeviceFormat> {
    let target = target_fps as f64;
    let chosen = device
        .formats()
        .into_iter()
        .filter(|format| {
            format
                .frame_rate_ranges
                .first()
                .is_some_and(|range| (range.max_fps - target).abs() < 0.5)
        })
        .last();

    let Some(format) = chosen else {
        tracing::warn!(
            "{} has no format running at {} fps, keeping its current format",
            device.name(),
            target_fps
        );
        return None;
    };

    let range = format.frame_rate_ranges[0];
    match device.set_active_format(&format, range.min_frame_duration(), range.max_frame_duration()) {
        Ok(()) => {
            tracing::info!(
                "Using {}x{} at {} fps on {}",
                format.width,
                format.height,
                target_fps,
                device.name()
            );
            Some(format)
        }
        Err(e) => {
            tracing::error!("Could not set active format: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segmentation_detector::PixelFormat;
    use tokio::time::timeout;

    #[derive(Default)]
    struct MockDeviceState {
        opened: bool,
        closes: usize,
        active: Option<(DeviceFormat, Duration, Duration)>,
        torch_calls: Vec<bool>,
        reads: usize,
    }

    struct MockDevice {
        position: CameraPosition,
        name: String,
        formats: Vec<DeviceFormat>,
        has_torch: bool,
        fail_open: bool,
        state: Arc<Mutex<MockDeviceState>>,
    }

    impl MockDevice {
        fn new(position: CameraPosition) -> Self {
            Self {
                position,
                name: format!("mock-{}", position),
                formats: vec![format(1280, 720, 30.0)],
                has_torch: false,
                fail_open: false,
                state: Arc::new(Mutex::new(MockDeviceState::default())),
            }
        }
    }

    fn format(width: u32, height: u32, max_fps: f64) -> DeviceFormat {
        DeviceFormat {
            width,
            height,
            frame_rate_ranges: vec![FrameRateRange {
                min_fps: 2.0,
                max_fps,
            }],
        }
    }

    impl CaptureDevice for MockDevice {
        fn position(&self) -> CameraPosition {
            self.position
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn formats(&self) -> Vec<DeviceFormat> {
            self.formats.clone()
        }

        fn set_active_format(
            &mut self,
            format: &DeviceFormat,
            min_frame_duration: Duration,
            max_frame_duration: Duration,
        ) -> Result<(), CameraError> {
            self.state.lock().active = Some((format.clone(), min_frame_duration, max_frame_duration));
            Ok(())
        }

        fn open(&mut self) -> Result<(), CameraError> {
            if self.fail_open {
                return Err(CameraError::OpenCameraFailed("device busy".to_string()));
            }
            self.state.lock().opened = true;
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.state.lock();
            state.opened = false;
            state.closes += 1;
        }

        fn read_frame(&mut self) -> Result<Option<PixelBuffer>, CameraError> {
            self.state.lock().reads += 1;
            let value = match self.position {
                CameraPosition::Back => 10,
                CameraPosition::Front => 200,
            };
            let raw = PixelBuffer::from_raw(4, 2, 12, PixelFormat::Bgr24, vec![value; 24])
                .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?;
            Ok(Some(raw))
        }

        fn exposure(&self) -> ExposureSnapshot {
            ExposureSnapshot {
                iso: 100.0,
                shutter_speed: Duration::from_millis(10),
                exposure_bias: 0.5,
            }
        }

        fn has_torch(&self) -> bool {
            self.has_torch
        }

        fn set_torch(&mut self, on: bool) -> Result<(), CameraError> {
            self.state.lock().torch_calls.push(on);
            Ok(())
        }
    }

    struct MockProvider {
        devices: Mutex<Vec<Box<dyn CaptureDevice>>>,
    }

    impl MockProvider {
        fn new(devices: Vec<MockDevice>) -> Self {
            Self {
                devices: Mutex::new(
                    devices
                        .into_iter()
                        .map(|d| Box::new(d) as Box<dyn CaptureDevice>)
                        .collect(),
                ),
            }
        }
    }

    impl DeviceProvider for MockProvider {
        fn discover(&self) -> Result<Vec<Box<dyn CaptureDevice>>, CameraError> {
            Ok(std::mem::take(&mut *self.devices.lock()))
        }
    }

    #[derive(Default)]
    struct CollectingObserver {
        frames: Mutex<Vec<Frame>>,
    }

    impl FrameObserver for CollectingObserver {
        fn on_frame(&self, frame: Frame) {
            self.frames.lock().push(frame);
        }
    }

    fn camera_config(target_fps: u32) -> CameraConfig {
        CameraConfig {
            position: CameraPosition::Back,
            target_fps,
            orientation: Orientation::Up,
            back_device_index: 0,
            front_device_index: None,
        }
    }

    fn camera_with(devices: Vec<MockDevice>) -> (Arc<Camera>, Arc<CollectingObserver>) {
        let observer = Arc::new(CollectingObserver::default());
        let camera = Camera::new(&MockProvider::new(devices), &camera_config(30), observer.clone()).unwrap();
        (Arc::new(camera), observer)
    }

    #[test]
    fn test_select_frame_rate_picks_last_matching_format() {
        let mut device = MockDevice::new(CameraPosition::Back);
        device.formats = vec![
            format(640, 480, 30.0),
            format(1920, 1080, 60.0),
            format(1280, 720, 30.0),
            format(3840, 2160, 24.0),
        ];
        let state = device.state.clone();

        let chosen = select_frame_rate(&mut device, 30).unwrap();

        assert_eq!((chosen.width, chosen.height), (1280, 720));
        let (active, min, max) = state.lock().active.clone().unwrap();
        assert_eq!(active, chosen);
        assert_eq!(min, Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(max, Duration::from_secs_f64(1.0 / 2.0));
    }

    #[test]
    fn test_select_frame_rate_without_match_keeps_format() {
        let mut device = MockDevice::new(CameraPosition::Back);
        device.formats = vec![format(1920, 1080, 60.0), format(640, 480, 120.0)];
        let state = device.state.clone();

        assert!(select_frame_rate(&mut device, 30).is_none());
        assert!(state.lock().active.is_none());
    }

    #[test]
    fn test_default_position_is_back() {
        let (camera, _) = camera_with(vec![
            MockDevice::new(CameraPosition::Front),
            MockDevice::new(CameraPosition::Back),
        ]);
        assert_eq!(camera.position(), CameraPosition::Back);
    }

    #[test]
    fn test_configure_missing_front_keeps_back() {
        let (camera, _) = camera_with(vec![MockDevice::new(CameraPosition::Back)]);

        let result = camera.configure(CameraPosition::Front);

        assert!(matches!(
            result,
            Err(CameraError::DeviceUnavailable(CameraPosition::Front))
        ));
        assert_eq!(camera.position(), CameraPosition::Back);
    }

    #[test]
    fn test_capture_once_delivers_frame_with_exposure() {
        let (camera, observer) = camera_with(vec![MockDevice::new(CameraPosition::Back)]);

        assert!(camera.capture_once());
        assert!(camera.capture_once());

        let frames = observer.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[0].exposure.iso, 100.0);
        assert_eq!(frames[0].image.get_pixel(0, 0).0, [10, 10, 10, 255]);
        assert_eq!(camera.current_frame().unwrap().dimensions(), (4, 2));
    }

    #[test]
    fn test_switching_camera_changes_frame_source() {
        let (camera, observer) = camera_with(vec![
            MockDevice::new(CameraPosition::Back),
            MockDevice::new(CameraPosition::Front),
        ]);

        camera.configure(CameraPosition::Front).unwrap();
        camera.capture_once();

        assert_eq!(observer.frames.lock()[0].image.get_pixel(0, 0).0, [200, 200, 200, 255]);
    }

    #[test]
    fn test_torch_without_hardware_is_noop() {
        let device = MockDevice::new(CameraPosition::Back);
        let state = device.state.clone();
        let (camera, _) = camera_with(vec![device]);

        assert_eq!(camera.set_torch(true), TorchOutcome::Unavailable);
        assert!(state.lock().torch_calls.is_empty());
    }

    #[test]
    fn test_torch_with_hardware_is_applied() {
        let mut device = MockDevice::new(CameraPosition::Back);
        device.has_torch = true;
        let state = device.state.clone();
        let (camera, _) = camera_with(vec![device]);

        assert_eq!(camera.set_torch(true), TorchOutcome::Applied);
        assert_eq!(camera.set_torch(false), TorchOutcome::Applied);
        assert_eq!(state.lock().torch_calls, vec![true, false]);
    }

    #[tokio::test]
    async fn test_start_without_device_fails() {
        let (camera, _) = camera_with(vec![MockDevice::new(CameraPosition::Front)]);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let result = camera.start(shutdown_rx);

        assert!(matches!(
            result,
            Err(CameraError::DeviceUnavailable(CameraPosition::Back))
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_device_cannot_open() {
        let mut device = MockDevice::new(CameraPosition::Back);
        device.fail_open = true;
        let (camera, _) = camera_with(vec![device]);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert!(matches!(
            camera.start(shutdown_rx),
            Err(CameraError::OpenCameraFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_loop_runs_until_shutdown() {
        let device = MockDevice::new(CameraPosition::Back);
        let state = device.state.clone();
        let observer = Arc::new(CollectingObserver::default());
        let camera = Arc::new(
            Camera::new(&MockProvider::new(vec![device]), &camera_config(200), observer.clone())
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = camera.start(shutdown_rx).unwrap();
        assert!(state.lock().opened);

        timeout(Duration::from_secs(5), async {
            while observer.frames.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let frames = observer.frames.lock();
        assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_running_device() {
        let back = MockDevice::new(CameraPosition::Back);
        let back_state = back.state.clone();
        let mut front = MockDevice::new(CameraPosition::Front);
        front.fail_open = true;
        let (camera, observer) = camera_with(vec![back, front]);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let _handle = camera.start(shutdown_rx).unwrap();

        let result = camera.configure(CameraPosition::Front);

        assert!(matches!(result, Err(CameraError::OpenCameraFailed(_))));
        assert_eq!(camera.position(), CameraPosition::Back);
        assert!(back_state.lock().opened);
        assert_eq!(back_state.lock().closes, 0);

        observer.frames.lock().clear();
        assert!(camera.capture_once());
        assert_eq!(observer.frames.lock()[0].image.get_pixel(0, 0).0, [10, 10, 10, 255]);
    }

    #[tokio::test]
    async fn test_switch_while_running_releases_previous_device() {
        let back = MockDevice::new(CameraPosition::Back);
        let back_state = back.state.clone();
        let front = MockDevice::new(CameraPosition::Front);
        let front_state = front.state.clone();
        let (camera, _) = camera_with(vec![back, front]);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let _handle = camera.start(shutdown_rx).unwrap();

        camera.configure(CameraPosition::Front).unwrap();

        assert_eq!(camera.position(), CameraPosition::Front);
        assert!(front_state.lock().opened);
        assert!(front_state.lock().active.is_some());
        let back_state = back_state.lock();
        assert!(!back_state.opened);
        assert_eq!(back_state.closes, 1);
    }
}
