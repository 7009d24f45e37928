use crate::{
    display::Feed,
    server::SharedState,
    stream::{VideoStream, VideoStreamError, CONTENT_TYPE},
};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    state.metrics.record_request("/video_feed");
    feed_response(&state, Feed::Preview)
}

#[instrument(skip(state))]
pub async fn mask_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    state.metrics.record_request("/mask_feed");
    feed_response(&state, Feed::Overlay)
}

fn feed_response(state: &SharedState, feed: Feed) -> Result<Response, VideoStreamError> {
    let stream = VideoStream::new(state.display.subscribe(feed)).generate_stream();

    let body = Body::from_stream(stream);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .body(body)
        .map_err(|e| VideoStreamError::HttpBuilderError(e.to_string()))?;

    Ok(response)
}

impl IntoResponse for VideoStreamError {
    fn into_response(self) -> Response {
        let status = match self {
            VideoStreamError::HttpBuilderError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
