use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use tokio::signal;
use tracing::info;

use crate::{
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub blob_storage: Arc<BlobStorage>,
    pub handle: Handle,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        Ok(Self {
            config,
            blob_storage,
            handle: Handle::new(),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let handle_sh = self.handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let route_state = RouteState {
            config: Arc::new(self.config.clone()),
            blob_storage: self.blob_storage.clone(),
        };
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
