use crate::{
    camera::{CameraError, CameraPosition, TorchOutcome},
    server::SharedState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task;
use tracing::instrument;

#[derive(Deserialize, Debug)]
pub struct TorchRequest {
    on: bool,
}

#[derive(Serialize)]
pub struct TorchStatus {
    applied: bool,
    available: bool,
}

#[derive(Deserialize, Debug)]
pub struct CameraRequest {
    position: CameraPosition,
}

#[derive(Serialize)]
pub struct CameraStatus {
    position: String,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Camera task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::Camera(CameraError::DeviceUnavailable(_)) => StatusCode::NOT_FOUND,
            ControlError::Camera(_) | ControlError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Torch problems are reported in the body and never fail the request.
/// Camera calls wait on the capture session, so they run on the blocking pool.
#[instrument(skip(state))]
pub async fn set_torch(
    State(state): State<SharedState>,
    Json(request): Json<TorchRequest>,
) -> Result<Json<TorchStatus>, ControlError> {
    state.metrics.record_request("/torch");
    let camera = state.camera.clone();
    let outcome = task::spawn_blocking(move || camera.set_torch(request.on)).await?;

    Ok(Json(TorchStatus {
        applied: outcome == TorchOutcome::Applied,
        available: outcome != TorchOutcome::Unavailable,
    }))
}

#[instrument(skip(state))]
pub async fn switch_camera(
    State(state): State<SharedState>,
    Json(request): Json<CameraRequest>,
) -> Result<Json<CameraStatus>, ControlError> {
    state.metrics.record_request("/camera");
    let camera = state.camera.clone();
    task::spawn_blocking(move || {
        camera.configure(request.position)?;
        camera.log_camera_info();
        Ok::<_, CameraError>(())
    })
    .await??;

    Ok(Json(CameraStatus {
        position: state.camera.position().to_string(),
    }))
}
