use anyhow::Result;
use blob_store::BlobStorageConfig;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, service::Service};

pub const TEST_SECRET: &str = "cfe6f0ecb5a2da338f1f1e748bcb1be5b093a5a2ca1b3c9e5cebd553faa2e7fa";

pub struct TestService {
    pub service: Service,
    pub base_url: String,
    _temp_dir: tempfile::TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        Self::with_config_overrides(|config| config).await
    }

    pub async fn with_config_overrides(
        overrides: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let cfg = overrides(ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            secret: TEST_SECRET.to_string(),
            blob_storage: BlobStorageConfig::new(
                temp_dir.path().join("blob_store").to_str().unwrap(),
            ),
            ..Default::default()
        });

        let service = Service::new(cfg).await?;
        let server = service.clone();
        tokio::spawn(async move { server.start().await });

        let addr = service
            .handle
            .listening()
            .await
            .ok_or_else(|| anyhow::anyhow!("server did not start"))?;

        Ok(Self {
            service,
            base_url: format!("http://{}", addr),
            _temp_dir: temp_dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
