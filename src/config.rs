use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_chunk_size() -> usize {
    blob_store::pipeline::DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Mount point for every route, e.g. `/depot`. Empty mounts at the
    /// root.
    #[serde(default)]
    pub api_prefix: String,
    /// Shared secret every request must present in the `x-depot-secret`
    /// header. 64 hex characters.
    #[serde(default)]
    pub secret: String,
    /// Write unit size for blob ingestion.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Optional stall limit for uploads. Unset means a stalled client holds
    /// its session open until the transport itself goes away.
    #[serde(default)]
    pub upload_idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub structured_logging: bool,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            api_prefix: String::new(),
            secret: String::new(),
            chunk_size_bytes: default_chunk_size(),
            upload_idle_timeout_secs: None,
            structured_logging: false,
            blob_storage: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.len() != 64 || hex::decode(&self.secret).is_err() {
            return Err(anyhow::anyhow!(
                "shared secret must be a 64 character hex string"
            ));
        }
        if self.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("chunk size must be non-zero"));
        }
        if !self.api_prefix.is_empty()
            && (!self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/'))
        {
            return Err(anyhow::anyhow!(
                "api prefix must start with '/' and must not end with one: {}",
                self.api_prefix
            ));
        }
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        Ok(())
    }

    pub fn upload_idle_timeout(&self) -> Option<Duration> {
        self.upload_idle_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "cfe6f0ecb5a2da338f1f1e748bcb1be5b093a5a2ca1b3c9e5cebd553faa2e7fa";

    #[test]
    fn default_config_has_no_usable_secret() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_secret_passes_validation() {
        let config = ServerConfig {
            secret: SECRET.to_string(),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn short_or_non_hex_secret_is_rejected() {
        let non_hex = "zz".repeat(32);
        for secret in ["deadbeef", non_hex.as_str()] {
            let config = ServerConfig {
                secret: secret.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted secret {secret:?}");
        }
    }

    #[test]
    fn api_prefix_must_be_rooted_without_trailing_slash() {
        for prefix in ["depot", "/depot/"] {
            let config = ServerConfig {
                secret: SECRET.to_string(),
                api_prefix: prefix.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted prefix {prefix:?}");
        }
        let config = ServerConfig {
            secret: SECRET.to_string(),
            api_prefix: "/depot".to_string(),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = format!(
            "listen_addr: 127.0.0.1:4000\nsecret: {SECRET}\nchunk_size_bytes: 1024\nblob_storage:\n  path: file:///tmp/depot-test\n"
        );
        let config: ServerConfig = Figment::new()
            .merge(Yaml::string(&yaml))
            .extract()
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.chunk_size_bytes, 1024);
        assert_eq!(config.upload_idle_timeout_secs, None);
        config.validate().unwrap();
    }
}
