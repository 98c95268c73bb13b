use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blob_store::{
    pipeline::{IngestionSession, SessionEvent},
    BlobError,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{RouteState, FILENAME_HEADER};
use crate::http_objects::{codes, DepotAPIError};

/// Stores the request body as a blob. The body is drained through an
/// ingestion session: one task owns the session, this handler feeds it
/// transport events. 200 with an empty body on success; 400 envelope when
/// the store cannot be opened; an interrupted upload is cleaned up and gets
/// an empty 400 (the client is usually already gone).
pub async fn store_blob(State(state): State<RouteState>, request: Request) -> Response {
    // Use the supplied filename, or generate a unique one.
    let key = request
        .headers()
        .get(FILENAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let writer = match state.blob_storage.open_write(&key).await {
        Ok(writer) => writer,
        Err(err) => {
            warn!(%key, "could not open blob store: {err}");
            return DepotAPIError::with_cause(codes::STORE_COULD_NOT_OPEN, &err).into_response();
        }
    };

    let session = IngestionSession::new(&key, writer, state.config.chunk_size_bytes);
    let (events, events_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(session.run(events_rx));

    let idle_timeout = state.config.upload_idle_timeout();
    let mut body = request.into_body().into_data_stream();
    loop {
        let frame = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    warn!(%key, "upload idle timeout, treating transport as closed");
                    let _ = events.send(SessionEvent::TransportClosed);
                    break;
                }
            },
            None => body.next().await,
        };
        match frame {
            Some(Ok(bytes)) => {
                let _ = events.send(SessionEvent::Chunk(bytes));
            }
            Some(Err(err)) => {
                info!(%key, "transport closed during upload: {err}");
                let _ = events.send(SessionEvent::TransportClosed);
                break;
            }
            None => {
                let _ = events.send(SessionEvent::EndOfStream);
                break;
            }
        }
    }
    drop(events);

    match driver.await {
        Ok(Ok(_stored)) => StatusCode::OK.into_response(),
        Ok(Err(BlobError::TransportInterrupted)) => StatusCode::BAD_REQUEST.into_response(),
        Ok(Err(err)) => {
            error!(%key, "blob store failed: {err}");
            DepotAPIError::with_cause(codes::STORE_FAILED, &err).into_response()
        }
        Err(join_err) => {
            error!(%key, "ingestion session failed: {join_err}");
            DepotAPIError::new(codes::STORE_FAILED).into_response()
        }
    }
}
