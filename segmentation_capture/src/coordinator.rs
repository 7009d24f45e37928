use crate::{
    converter,
    display::DisplaySink,
    frame::{Frame, FrameObserver},
    telemetry::{FpsCounter, Metrics},
};
use segmentation_detector::{DetectResult, DetectorError, InferenceEngine};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Inferring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted,
    /// An inference was already in flight.
    Dropped,
    /// The frame could not be converted into a model input.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub accepted: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Result of one inference, routed back to the pipeline task.
#[derive(Debug)]
pub struct InferenceDone {
    pub sequence: u64,
    pub result: DetectResult,
}

struct InFlight {
    sequence: u64,
    submitted_at: Instant,
}

/// Empties the in-flight slot when dropped.
struct ClearOnDrop<'a>(&'a mut Option<InFlight>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        *self.0 = None;
    }
}

/// Frame intake side of a [`Pipeline`], registered with the camera.
#[derive(Clone)]
pub struct PipelineHandle {
    frames: mpsc::Sender<Frame>,
    metrics: Option<Arc<Metrics>>,
}

impl FrameObserver for PipelineHandle {
    fn on_frame(&self, frame: Frame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::debug!("Pipeline queue full, dropping frame {}", frame.sequence);
                if let Some(metrics) = &self.metrics {
                    metrics.record_frame("queue_full");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Pipeline stopped, discarding frame");
            }
        }
    }
}

/// Sequences frames through conversion and inference, allowing at most one
/// inference in flight. Frames arriving meanwhile are dropped, not queued.
pub struct Pipeline<E: InferenceEngine, D: DisplaySink> {
    engine: E,
    display: D,
    current_input: Option<InFlight>,
    frames_rx: mpsc::Receiver<Frame>,
    done_tx: mpsc::UnboundedSender<InferenceDone>,
    done_rx: mpsc::UnboundedReceiver<InferenceDone>,
    metrics: Option<Arc<Metrics>>,
    camera_fps: FpsCounter,
    inference_fps: FpsCounter,
    stats: PipelineStats,
}

impl<E: InferenceEngine, D: DisplaySink> Pipeline<E, D> {
    pub fn new(
        engine: E,
        display: D,
        frame_queue_capacity: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, PipelineHandle) {
        let (frames_tx, frames_rx) = mpsc::channel(frame_queue_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let pipeline = Self {
            engine,
            display,
            current_input: None,
            frames_rx,
            done_tx,
            done_rx,
            metrics: metrics.clone(),
            camera_fps: FpsCounter::new(),
            inference_fps: FpsCounter::new(),
            stats: PipelineStats::default(),
        };
        let handle = PipelineHandle {
            frames: frames_tx,
            metrics,
        };

        (pipeline, handle)
    }

    pub fn state(&self) -> PipelineState {
        match self.current_input {
            Some(_) => PipelineState::Inferring,
            None => PipelineState::Idle,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn on_frame(&mut self, frame: Frame) -> FrameOutcome {
        self.display.show_preview(&frame.image);
        if let (Some(fps), Some(metrics)) = (self.camera_fps.tick(), &self.metrics) {
            metrics.record_camera_fps(fps);
        }

        if let Some(in_flight) = &self.current_input {
            tracing::trace!(
                "Frame {} dropped, frame {} still in inference",
                frame.sequence,
                in_flight.sequence
            );
            self.stats.dropped += 1;
            self.record_frame("dropped");
            return FrameOutcome::Dropped;
        }

        let Some(input) = converter::pixel_buffer_from_image(&frame.image) else {
            tracing::warn!("Skipping frame {}: conversion failed", frame.sequence);
            self.stats.skipped += 1;
            self.record_frame("skipped");
            return FrameOutcome::Skipped;
        };

        let sequence = frame.sequence;
        self.current_input = Some(InFlight {
            sequence,
            submitted_at: Instant::now(),
        });
        self.stats.accepted += 1;
        self.record_frame("accepted");

        let done_tx = self.done_tx.clone();
        self.engine.detect(
            input,
            Box::new(move |result| {
                // The pipeline may already be gone during shutdown.
                let _ = done_tx.send(InferenceDone { sequence, result });
            }),
        );

        FrameOutcome::Submitted
    }

    /// Applies an inference result. The in-flight slot is cleared on every
    /// path, after the display has been updated.
    pub fn on_inference_complete(&mut self, done: InferenceDone) -> Result<(), PipelineError> {
        let slot = ClearOnDrop(&mut self.current_input);

        let elapsed_ms = match slot.0.as_ref() {
            Some(in_flight) => {
                if in_flight.sequence != done.sequence {
                    tracing::warn!(
                        "Completion for frame {} while frame {} was in flight",
                        done.sequence,
                        in_flight.sequence
                    );
                }
                Some(in_flight.submitted_at.elapsed().as_millis() as u64)
            }
            None => None,
        };

        let status = match &done.result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        if let Some(metrics) = &self.metrics {
            if let Some(elapsed_ms) = elapsed_ms {
                metrics.record_inference_duration(elapsed_ms, status);
            }
            if let Some(fps) = self.inference_fps.tick() {
                metrics.record_inference_fps(fps);
            }
        }

        match done.result {
            Ok(Some(mask)) => {
                let overlay = converter::image_from_pixel_buffer(&mask);
                self.display.show_overlay(&overlay);
                self.stats.completed += 1;
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("Inference for frame {} returned no mask", done.sequence);
                self.stats.completed += 1;
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Inference for frame {} failed: {}", done.sequence, e);
                self.stats.failed += 1;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Inference for frame {} broke an invariant: {}", done.sequence, e);
                self.stats.failed += 1;
                let reason = match e {
                    DetectorError::InvariantViolation(reason) => reason,
                    other => other.to_string(),
                };
                Err(PipelineError::InvariantViolation(reason))
            }
        }
    }

    fn record_frame(&self, outcome: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_frame(outcome);
        }
    }

    /// Runs the pipeline until shutdown, the frame source closing, or an
    /// invariant violation.
    pub async fn run(
        mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<PipelineStats, PipelineError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("Pipeline received shutdown signal");
                    break;
                }
                Some(done) = self.done_rx.recv() => {
                    self.on_inference_complete(done)?;
                }
                frame = self.frames_rx.recv() => match frame {
                    Some(frame) => {
                        self.on_frame(frame);
                    }
                    None => {
                        tracing::info!("Frame source closed, stopping pipeline");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            accepted = self.stats.accepted,
            dropped = self.stats.dropped,
            skipped = self.stats.skipped,
            completed = self.stats.completed,
            failed = self.stats.failed,
            "Pipeline stopped"
        );
        Ok(self.stats)
    }
}
