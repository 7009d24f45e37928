use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

pub struct Metrics {
    request_counter: Counter<u64>,
    frame_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    camera_fps: Gauge<f64>,
    inference_fps: Gauge<f64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| prometheus::Error::Msg(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("segmentation_capture");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let frame_counter = meter
            .u64_counter("frames_total")
            .with_description("Frames reaching the pipeline, by outcome")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration from submission to completion of an inference in milliseconds")
            .build();

        let camera_fps = meter
            .f64_gauge("camera_fps")
            .with_description("FPS of frames delivered by the camera")
            .build();

        let inference_fps = meter
            .f64_gauge("inference_fps")
            .with_description("FPS of completed inferences")
            .build();

        Ok(Metrics {
            request_counter,
            frame_counter,
            inference_duration,
            camera_fps,
            inference_fps,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_frame(&self, outcome: &'static str) {
        self.frame_counter
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, status: &'static str) {
        self.inference_duration
            .record(duration_ms, &[KeyValue::new("status", status)]);
    }

    pub fn record_camera_fps(&self, fps: f64) {
        self.camera_fps.record(fps, &[]);
    }

    pub fn record_inference_fps(&self, fps: f64) {
        self.inference_fps.record(fps, &[]);
    }
}

/// Counts events and reports a rate roughly once per second.
pub struct FpsCounter {
    window_start: Instant,
    count: u32,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return None;
        }
        let fps = self.count as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.count = 0;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
