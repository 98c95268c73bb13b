use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use blob_store::BlobStorage;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::ServerConfig, middleware::require_secret};

mod download;
mod files;
mod ingest;

pub const FILENAME_HEADER: &str = "x-depot-filename";

#[derive(Clone)]
pub struct RouteState {
    pub config: Arc<ServerConfig>,
    pub blob_storage: Arc<BlobStorage>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    let api_prefix = route_state.config.api_prefix.clone();
    let secured = Router::new()
        .route("/store", post(ingest::store_blob))
        .route("/stream", get(download::stream_blob))
        .route("/exists", post(files::blob_exists))
        .route("/unlink", post(files::unlink_blobs))
        .layer(from_fn_with_state(route_state.clone(), require_secret))
        .with_state(route_state);

    let routes = Router::new().route("/", get(index)).merge(secured);
    // Mount under the configured prefix, matching the path the service was
    // deployed at.
    let routes = if api_prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&api_prefix, routes)
    };

    routes
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();
                    tracing::debug_span!("request", %method, %uri)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
}

async fn index() -> &'static str {
    "depot"
}
