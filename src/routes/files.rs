use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use super::RouteState;
use crate::http_objects::{codes, DepotAPIError, ExistsRequest, UnlinkRequest};

/// Point probe for a key. 200 when present. Absence and probe failure both
/// answer 400, with distinct envelope codes so the two are still tellable
/// apart.
pub async fn blob_exists(
    State(state): State<RouteState>,
    Json(request): Json<ExistsRequest>,
) -> Response {
    let Some(file_name) = request.file_name else {
        return DepotAPIError::new(codes::FILE_EXISTS).into_response();
    };
    match state.blob_storage.exists(&file_name).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => DepotAPIError::new(codes::FILE_EXISTS).into_response(),
        Err(err) => {
            warn!(key = %file_name, "existence probe failed: {err}");
            DepotAPIError::with_cause(codes::FILE_EXISTS_FAILED, &err).into_response()
        }
    }
}

/// Best-effort batch delete. Every key is attempted; the response carries
/// only the last error.
pub async fn unlink_blobs(
    State(state): State<RouteState>,
    Json(request): Json<UnlinkRequest>,
) -> Response {
    match state.blob_storage.unlink_batch(&request.files).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => DepotAPIError::with_cause(codes::UNLINK_FAILED, &err).into_response(),
    }
}
