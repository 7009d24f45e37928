use crate::{
    buffer::PixelBuffer,
    crop::CropScalePolicy,
    error::DetectorError,
    model_service::{Observation, SegmentationModel},
};
use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::Instant,
};
use tokio::sync::mpsc;

pub type DetectResult = Result<Option<PixelBuffer>, DetectorError>;

/// Called exactly once per `detect` call with the output mask, `None` when
/// the model produced no observation, or the error.
pub type Completion = Box<dyn FnOnce(DetectResult) + Send + 'static>;

pub trait InferenceEngine: Send + Sync + 'static {
    /// Submits `input` without blocking the caller. `completion` runs on the
    /// engine's own execution context.
    fn detect(&self, input: PixelBuffer, completion: Completion);
}

impl<T: InferenceEngine + ?Sized> InferenceEngine for std::sync::Arc<T> {
    fn detect(&self, input: PixelBuffer, completion: Completion) {
        (**self).detect(input, completion)
    }
}

const WORKER_THREAD_NAME: &str = "segmentation-detector";

struct Job {
    input: PixelBuffer,
    completion: Completion,
}

/// Runs a [`SegmentationModel`] on a dedicated background thread, one input
/// at a time, in submission order.
pub struct Detector {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Detector {
    pub fn new<M: SegmentationModel>(model: M, crop_scale: CropScalePolicy) -> std::io::Result<Self> {
        let (jobs, rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(model, crop_scale, rx))?;

        Ok(Self { jobs })
    }
}

impl InferenceEngine for Detector {
    fn detect(&self, input: PixelBuffer, completion: Completion) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(Job { input, completion }) {
            tracing::error!("Detector worker is gone, failing request");
            (job.completion)(Err(DetectorError::WorkerStopped));
        }
    }
}

/// Model input geometry, built from the model on first use.
struct PredictionRequest {
    width: u32,
    height: u32,
    crop_scale: CropScalePolicy,
}

impl PredictionRequest {
    fn new(model: &impl SegmentationModel, crop_scale: CropScalePolicy) -> Self {
        let (width, height) = model.input_size();
        tracing::info!(width, height, ?crop_scale, "Built prediction request");
        Self {
            width,
            height,
            crop_scale,
        }
    }

    fn perform(&self, model: &mut impl SegmentationModel, input: &PixelBuffer) -> DetectResult {
        let prepared = self.crop_scale.apply(input, self.width, self.height)?;
        let observations = model.run(&prepared)?;

        match observations.into_iter().next() {
            None => Ok(None),
            Some(Observation::PixelBuffer(mask)) => Ok(Some(mask)),
            Some(other) => Err(DetectorError::InvariantViolation(format!(
                "unexpected result type from model: {}",
                other.kind()
            ))),
        }
    }
}

fn run_worker<M: SegmentationModel>(
    mut model: M,
    crop_scale: CropScalePolicy,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    let mut request: Option<PredictionRequest> = None;

    while let Some(job) = rx.blocking_recv() {
        let request = request.get_or_insert_with(|| PredictionRequest::new(&model, crop_scale));
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| request.perform(&mut model, &job.input)))
            .unwrap_or_else(|_| {
                Err(DetectorError::InvariantViolation(
                    "model panicked during inference".to_string(),
                ))
            });

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Inference finished"
        );
        (job.completion)(result);
    }

    tracing::info!("Detector worker stopped");
}
