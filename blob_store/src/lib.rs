use std::{env, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use object_store::{parse_url, path::Path, Attribute, MultipartUpload, ObjectStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use url::Url;

pub mod pipeline;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors surfaced by the store adapter and the ingestion pipeline. Every
/// backing-store failure is translated into one of these at the session
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("could not open the blob store for {key}: {source}")]
    OpenFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("could not write chunk for {key}: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("could not read chunk for {key}: {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("transport closed before the stream ended")]
    TransportInterrupted,
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("existence probe failed for {key}: {source}")]
    ExistsProbeFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("could not unlink {key}: {source}")]
    UnlinkFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: String,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: format!("file://{}", path),
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = format!(
            "file://{}",
            env::current_dir()
                .expect("unable to get current directory")
                .join("depot_storage/blobs")
                .display()
        );
        info!("using blob store path: {}", blob_store_path);
        BlobStorageConfig {
            path: blob_store_path,
        }
    }
}

/// Result of a completed ingestion.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub key: String,
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

/// An open blob with its declared content type and length, resolved before
/// the first body byte is read.
pub struct BlobReading {
    pub content_type: String,
    pub size_bytes: u64,
    pub stream: BoxStream<'static, Result<Bytes, BlobError>>,
}

impl std::fmt::Debug for BlobReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReading")
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// The write half of an ingestion session. One call to `write_chunk` is one
/// write unit against the backing store; the pipeline guarantees at most one
/// is in flight per session.
#[async_trait]
pub trait ChunkWriter: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), BlobError>;

    /// Completes the upload, making the object visible under its key.
    async fn finish(self) -> Result<StoredBlob, BlobError>;

    /// Cleanup after an interrupted upload. Whatever was written so far must
    /// not survive under the key.
    async fn discard(self) -> Result<(), BlobError>;
}

pub struct BlobWriter {
    key: String,
    path: Path,
    upload: Box<dyn MultipartUpload>,
    hasher: Sha256,
    size_bytes: u64,
}

#[async_trait]
impl ChunkWriter for BlobWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), BlobError> {
        self.hasher.update(&chunk);
        self.size_bytes += chunk.len() as u64;
        self.upload
            .put_part(chunk.into())
            .await
            .map_err(|e| BlobError::WriteFailed {
                key: self.key.clone(),
                source: e,
            })
    }

    async fn finish(mut self) -> Result<StoredBlob, BlobError> {
        self.upload
            .complete()
            .await
            .map_err(|e| BlobError::WriteFailed {
                key: self.key.clone(),
                source: e,
            })?;
        Ok(StoredBlob {
            key: self.key,
            url: self.path.to_string(),
            size_bytes: self.size_bytes,
            sha256_hash: format!("{:x}", self.hasher.finalize()),
        })
    }

    async fn discard(mut self) -> Result<(), BlobError> {
        // The upload is staged until `complete`, so aborting drops the
        // partial data without it ever becoming visible under the key. An
        // interrupted overwrite leaves the previous object untouched.
        self.upload
            .abort()
            .await
            .map_err(|e| BlobError::UnlinkFailed {
                key: self.key,
                source: e,
            })
    }
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let (object_store, path) = Self::build_object_store(&config.path)?;
        Ok(Self {
            object_store: Arc::new(object_store),
            path,
        })
    }

    pub fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path)> {
        let url = url_str.parse::<Url>()?;
        Ok(parse_url(&url)?)
    }

    pub fn get_object_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store.clone()
    }

    pub fn get_path(&self) -> Path {
        self.path.clone()
    }

    /// Opens the store for writing under `key`. No chunks are accepted when
    /// this fails. Writing to an existing key overwrites it once the upload
    /// completes.
    pub async fn open_write(&self, key: &str) -> Result<BlobWriter, BlobError> {
        let path = self.path.child(key);
        let upload = self
            .object_store
            .put_multipart(&path)
            .await
            .map_err(|e| BlobError::OpenFailed {
                key: key.to_string(),
                source: e,
            })?;
        Ok(BlobWriter {
            key: key.to_string(),
            path,
            upload,
            hasher: Sha256::new(),
            size_bytes: 0,
        })
    }

    /// Opens a completed object for streaming. A missing key is `NotFound`;
    /// any other open failure is `OpenFailed`.
    pub async fn open_read(&self, key: &str) -> Result<BlobReading, BlobError> {
        let path = self.path.child(key);
        let get_result = self.object_store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
            other => BlobError::OpenFailed {
                key: key.to_string(),
                source: other,
            },
        })?;
        let size_bytes = get_result.meta.size;
        let content_type = get_result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.to_string())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        // No buffering or reordering here; pacing is left to the consumer.
        let (tx, rx) = mpsc::unbounded_channel();
        let key = key.to_string();
        tokio::spawn(async move {
            let mut stream = get_result.into_stream();
            while let Some(chunk) = stream.next().await {
                let _ = tx.send(chunk.map_err(|e| BlobError::ReadFailed {
                    key: key.clone(),
                    source: e,
                }));
            }
        });
        Ok(BlobReading {
            content_type,
            size_bytes,
            stream: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    /// Point probe. A failed probe is an error of its own, never reported as
    /// "absent".
    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        match self.object_store.head(&self.path.child(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BlobError::ExistsProbeFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// Unlinking a key that does not exist succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        match self.object_store.delete(&self.path.child(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BlobError::UnlinkFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// Best-effort batch removal: every key is attempted, successful
    /// deletions are not rolled back, and only the last error is reported.
    pub async fn unlink_batch(&self, keys: &[String]) -> Result<(), BlobError> {
        let mut last_error = None;
        for key in keys {
            if let Err(err) = self.delete(key).await {
                warn!(%key, "unlink failed: {err}");
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes, BlobError> {
        let mut reader = self.open_read(key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }
}
