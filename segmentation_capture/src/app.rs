use crate::{
    camera::{Camera, DeviceProvider},
    config::Config,
    coordinator::{Pipeline, PipelineError, PipelineStats},
    display::MjpegDisplay,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use segmentation_detector::{Detector, SegmentationModel};
use std::{future::Future, sync::Arc};
use tokio::{signal, sync::broadcast, task::JoinHandle};

/// Wires camera, pipeline, detector and HTTP server together and runs them
/// until a shutdown signal arrives or the pipeline fails.
pub async fn start_app<M: SegmentationModel>(
    config: Config,
    provider: &dyn DeviceProvider,
    model: M,
) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let display = Arc::new(MjpegDisplay::new(config.pipeline.jpeg_quality));

    let detector = match Detector::new(model, config.model.crop_scale) {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!("Failed to start detector: {:?}", e);
            return Err(e.into());
        }
    };

    let (pipeline, handle) = Pipeline::new(
        detector,
        display.clone(),
        config.pipeline.frame_queue_capacity,
        Some(metrics.clone()),
    );

    let camera = match Camera::new(provider, &config.camera, Arc::new(handle)) {
        Ok(camera) => Arc::new(camera),
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let state = SharedState {
        camera: camera.clone(),
        display,
        metrics,
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let camera_handle = camera.start(shutdown_tx.subscribe())?;
    camera.log_camera_info();
    let pipeline_handle = tokio::spawn(pipeline.run(shutdown_tx.subscribe()));
    let server_handle = server.run(shutdown_tx.subscribe())?;

    supervise(
        pipeline_handle,
        camera_handle,
        server_handle,
        shutdown_tx,
        shutdown_signal(),
    )
    .await
}

type PipelineTask = JoinHandle<Result<PipelineStats, PipelineError>>;

/// Waits for `signal` or the end of the pipeline, stops every task, and
/// reports the pipeline's error first, then the server's.
async fn supervise(
    mut pipeline: PipelineTask,
    camera: JoinHandle<()>,
    server: JoinHandle<anyhow::Result<()>>,
    shutdown_tx: broadcast::Sender<()>,
    signal: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let finished = tokio::select! {
        _ = signal => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
            None
        }
        result = &mut pipeline => Some(result),
    };

    let _ = shutdown_tx.send(());
    if let Err(e) = camera.await {
        tracing::error!("Camera task failed: {}", e);
    }
    let pipeline_result = match finished {
        Some(result) => result,
        None => pipeline.await,
    };
    let server_result = match server.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = &server_result {
        tracing::error!("HTTP server failed: {}", e);
    }

    match pipeline_result {
        Ok(Ok(stats)) => {
            tracing::info!(accepted = stats.accepted, dropped = stats.dropped, "Pipeline finished");
        }
        Ok(Err(e)) => {
            tracing::error!("Pipeline stopped: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!("Pipeline task failed: {}", e);
            return Err(e.into());
        }
    }

    server_result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
