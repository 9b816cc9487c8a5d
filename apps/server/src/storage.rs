//! Object store adapter: R2/S3 in production, local filesystem or memory for
//! development and tests. Presigned PUT URLs are only available on the s3
//! backend; the dev backends fall back to the public URL so the flow stays
//! exercisable end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};
use tidepool_shared::error::ChatError;

use crate::config::StorageConfig;

/// How long a presigned PUT stays valid.
const PRESIGN_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct PresignedPut {
    pub url: String,
    pub method: &'static str,
}

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<AmazonS3>>,
    public_base_url: String,
}

impl ObjectStorage {
    /// Build the backend selected by configuration.
    ///
    /// - `"s3"`: R2 or any S3-compatible endpoint, with presigned PUT support
    /// - `"local"`: creates the directory if needed, uses `LocalFileSystem`
    /// - `"memory"`: uses `InMemory` (for testing)
    pub fn from_config(config: &StorageConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let public_base_url = config.public_base_url.trim_end_matches('/').to_string();
        match config.backend.as_str() {
            "s3" => {
                let s3 = AmazonS3Builder::new()
                    .with_endpoint(&config.endpoint_url)
                    .with_access_key_id(&config.access_key_id)
                    .with_secret_access_key(&config.secret_access_key)
                    .with_bucket_name(&config.bucket)
                    .with_region(&config.region)
                    .build()?;
                let s3 = Arc::new(s3);
                Ok(Self {
                    store: s3.clone(),
                    signer: Some(s3),
                    public_base_url,
                })
            }
            "local" => {
                std::fs::create_dir_all(&config.local_path)?;
                let store = LocalFileSystem::new_with_prefix(&config.local_path)?;
                Ok(Self {
                    store: Arc::new(store),
                    signer: None,
                    public_base_url,
                })
            }
            "memory" => Ok(Self {
                store: Arc::new(InMemory::new()),
                signer: None,
                public_base_url,
            }),
            other => Err(format!("unknown storage backend: {other}").into()),
        }
    }

    /// In-memory instance for tests.
    pub fn in_memory(public_base_url: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            signer: None,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ChatError> {
        let path = StorePath::from(key);
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| ChatError::Upstream(format!("object put failed: {e}")))?;
        Ok(())
    }

    /// Size of the stored object, if it exists.
    pub async fn head_size(&self, key: &str) -> Result<u64, ChatError> {
        let path = StorePath::from(key);
        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| ChatError::Upstream(format!("object head failed: {e}")))?;
        Ok(meta.size as u64)
    }

    pub async fn delete(&self, key: &str) -> Result<(), ChatError> {
        let path = StorePath::from(key);
        self.store
            .delete(&path)
            .await
            .map_err(|e| ChatError::Upstream(format!("object delete failed: {e}")))?;
        Ok(())
    }

    /// Presigned PUT for direct client uploads. On backends without signing
    /// support the public URL is returned, which is enough for development.
    pub async fn presign_put(&self, key: &str) -> Result<PresignedPut, ChatError> {
        let url = match &self.signer {
            Some(s3) => {
                let path = StorePath::from(key);
                s3.signed_url(Method::PUT, &path, PRESIGN_TTL)
                    .await
                    .map_err(|e| ChatError::Upstream(format!("presign failed: {e}")))?
                    .to_string()
            }
            None => self.public_url(key),
        };
        Ok(PresignedPut {
            url,
            method: "PUT",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inmemory_backend_roundtrip() {
        let storage = ObjectStorage::in_memory("https://cdn.example.com");
        storage
            .put("avatars/u123", b"png bytes".to_vec())
            .await
            .unwrap();
        assert_eq!(storage.head_size("avatars/u123").await.unwrap(), 9);
        storage.delete("avatars/u123").await.unwrap();
        assert!(storage.head_size("avatars/u123").await.is_err());
    }

    #[tokio::test]
    async fn local_backend_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: "local".into(),
            local_path: dir.path().to_str().unwrap().into(),
            ..Default::default()
        };
        let storage = ObjectStorage::from_config(&config).unwrap();
        storage.put("test.bin", b"test data".to_vec()).await.unwrap();
        assert_eq!(storage.head_size("test.bin").await.unwrap(), 9);
    }

    #[test]
    fn unknown_backend_returns_error() {
        let config = StorageConfig {
            backend: "ftp".into(),
            ..Default::default()
        };
        assert!(ObjectStorage::from_config(&config).is_err());
    }

    #[test]
    fn public_url_joins_base_and_key() {
        let storage = ObjectStorage::in_memory("https://cdn.example.com/");
        assert_eq!(
            storage.public_url("emojis/e123.png"),
            "https://cdn.example.com/emojis/e123.png"
        );
        assert_eq!(
            storage.public_url("/avatars/u1"),
            "https://cdn.example.com/avatars/u1"
        );
    }

    #[tokio::test]
    async fn presign_falls_back_to_public_url_without_signer() {
        let storage = ObjectStorage::in_memory("https://cdn.example.com");
        let put = storage.presign_put("staging/uploads/u1/f1/a.png").await.unwrap();
        assert_eq!(put.method, "PUT");
        assert_eq!(
            put.url,
            "https://cdn.example.com/staging/uploads/u1/f1/a.png"
        );
    }
}
