//! Artifact blob storage, backed by the object_store crate.
//!
//! References are opaque keys like `jobs/{id}/fax.pdf`; callers never see
//! the concrete layout. S3 writes request SSE-KMS when a key id is
//! configured, and endpoints are TLS unless an explicit dev endpoint
//! overrides them.

use object_store::{path::Path as StoragePath, ObjectStore};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage misconfigured: {0}")]
    Config(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub label: &'static str,
}

impl StorageClient {
    /// Build a client from configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self::in_memory()),
            StorageProvider::Local => Self::local(&config.root),
            StorageProvider::S3 => Self::s3(config),
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            label: "memory",
        }
    }

    /// Local filesystem storage rooted at a directory
    pub fn local(root: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| StorageError::Config(format!("cannot create {}: {e}", root.display())))?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store: Arc::new(store),
            label: "local",
        })
    }

    /// S3 (or S3-compatible) storage
    pub fn s3(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .as_deref()
            .ok_or_else(|| StorageError::Config("s3 storage requires a bucket".into()))?;

        let mut builder = object_store::aws::AmazonS3Builder::new().with_bucket_name(bucket);

        if let Some(region) = &config.region {
            builder = builder.with_region(region.clone());
        }
        if let Some(endpoint) = &config.endpoint {
            // Dev endpoints (minio et al.) may be plain http
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(access_key) = &config.access_key {
            builder = builder.with_access_key_id(access_key.clone());
        }
        if let Some(secret_key) = &config.secret_key {
            builder = builder.with_secret_access_key(secret_key.clone());
        }
        if let Some(kms_key_id) = &config.kms_key_id {
            builder = builder.with_sse_kms_encryption(kms_key_id.clone());
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
            label: "s3",
        })
    }

    /// Store bytes under a reference
    pub async fn put(&self, reference: &str, data: Vec<u8>) -> Result<()> {
        let path = StoragePath::from(reference);
        let size = data.len();
        self.store.put(&path, data.into()).await?;
        tracing::debug!(reference, size, "Stored artifact");
        Ok(())
    }

    /// Fetch the bytes behind a reference
    pub async fn get(&self, reference: &str) -> Result<Vec<u8>> {
        let path = StoragePath::from(reference);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(reference.to_string()),
            other => StorageError::ObjectStore(other),
        })?;
        let bytes = result.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Delete a reference; deleting a missing reference is not an error
    pub async fn delete(&self, reference: &str) -> Result<()> {
        let path = StoragePath::from(reference);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
