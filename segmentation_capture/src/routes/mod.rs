mod controls;
mod health;
mod metrics;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/mask_feed", get(video_feed::mask_feed))
        .route("/torch", post(controls::set_torch))
        .route("/camera", post(controls::switch_camera))
}
