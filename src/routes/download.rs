use axum::{
    body::Body,
    extract::State,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap,
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use blob_store::BlobError;
use tracing::error;

use super::{RouteState, FILENAME_HEADER};

/// Streams a stored blob back to the client. Content type and length are
/// declared before the first body byte; pacing of the body is left to the
/// connection's own backpressure.
pub async fn stream_blob(State(state): State<RouteState>, headers: HeaderMap) -> Response {
    let Some(key) = headers
        .get(FILENAME_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let reading = match state.blob_storage.open_read(key).await {
        Ok(reading) => reading,
        Err(BlobError::NotFound(_)) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(%key, "could not open blob for streaming: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Response::builder()
        .header(CONTENT_TYPE, reading.content_type)
        .header(CONTENT_LENGTH, reading.size_bytes.to_string())
        .body(Body::from_stream(reading.stream))
        .unwrap_or_else(|err| {
            error!(%key, "could not build streaming response: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
