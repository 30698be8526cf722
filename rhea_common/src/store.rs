//! # Content-Addressed Object Store Client
//!
//! Thin client over an S3-compatible object store. Payloads are keyed by the
//! SHA-256 of their bytes, so a handle is stable for identical content and
//! writes can never conflict. Besides content-addressed blobs, the store also
//! holds the per-tool resource trees under a `{tool_id}/` prefix, which
//! workers mirror into a local scratch directory before execution.
//!
//! The client is stateless apart from the underlying connection pool. It is
//! cheap to clone and safe to share across tasks.

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    ObjectStore, PutPayload, aws::AmazonS3Builder, memory::InMemory, path::Path as StorePath,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};

/// Opaque content-addressed identifier for bytes in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Handle {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for Handle {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Error types for object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    #[error("no object associated with handle '{0}'")]
    NotFound(String),

    #[error("failed to serialize store payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error represents a potentially recoverable condition.
    /// `NotFound` is definitive; an unreachable store may come back.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StoreError::NotFound(path),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Client for the shared object store.
///
/// All blob traffic between the session controller, workers, and the REST
/// gateway goes through this type. Ownership of the bytes belongs to the
/// store; callers only ever hold handles.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore").finish_non_exhaustive()
    }
}

impl BlobStore {
    /// In-process store backed by memory. Used by tests and local smoke runs.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Connect to an S3-compatible endpoint (MinIO in the default deployment).
    pub fn s3(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        secure: bool,
    ) -> Result<Self, StoreError> {
        let scheme = if secure { "https" } else { "http" };
        let store = AmazonS3Builder::new()
            .with_endpoint(format!("{scheme}://{endpoint}"))
            .with_allow_http(!secure)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_bucket_name(bucket)
            .with_region("us-east-1")
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(store),
        })
    }

    /// Store a payload under its content address and return the handle.
    pub async fn put(&self, bytes: Bytes) -> Result<Handle, StoreError> {
        let key = content_key(&bytes);
        let path = StorePath::from(key.clone());
        self.inner
            .put(&path, PutPayload::from_bytes(bytes))
            .await?;
        Ok(Handle::new(key))
    }

    /// Store a payload under an explicit key. Used to seed tool resource
    /// trees, where the path inside the `{tool_id}/` prefix is meaningful.
    pub async fn put_at(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = StorePath::from(key);
        self.inner
            .put(&path, PutPayload::from_bytes(bytes))
            .await?;
        Ok(())
    }

    /// Fetch the bytes behind a handle.
    pub async fn get(&self, handle: &Handle) -> Result<Bytes, StoreError> {
        let path = StorePath::from(handle.as_str());
        let result = self.inner.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StoreError::NotFound(handle.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        })?;
        Ok(result.bytes().await?)
    }

    /// Check whether a handle resolves to a stored object.
    pub async fn contains(&self, handle: &Handle) -> Result<bool, StoreError> {
        let path = StorePath::from(handle.as_str());
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    /// Walk every object under `prefix`, yielding `(relative path, bytes)`
    /// pairs. Relative paths are taken against the prefix so callers can
    /// mirror the listing onto a local directory tree.
    pub async fn iter_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let normalized = prefix.trim_end_matches('/');
        let store_prefix = StorePath::from(normalized);
        let metas: Vec<_> = self
            .inner
            .list(Some(&store_prefix))
            .try_collect()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut entries = Vec::with_capacity(metas.len());
        for meta in metas {
            let full = meta.location.to_string();
            let relative = full
                .strip_prefix(normalized)
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or_else(|| full.clone());
            let bytes = self.inner.get(&meta.location).await?.bytes().await?;
            entries.push((relative, bytes));
        }
        Ok(entries)
    }
}

fn content_key(bytes: &Bytes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = BlobStore::in_memory();
        let payload = Bytes::from_static(b"col1,col2\n1,2\n3,4\n");

        let handle = store.put(payload.clone()).await.unwrap();
        let fetched = store.get(&handle).await.unwrap();

        assert_eq!(fetched, payload);
    }

    #[tokio::test]
    async fn identical_content_yields_identical_handles() {
        let store = BlobStore::in_memory();
        let a = store.put(Bytes::from_static(b"same")).await.unwrap();
        let b = store.put(Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(a, b);

        let c = store.put(Bytes::from_static(b"different")).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn missing_handle_is_not_found() {
        let store = BlobStore::in_memory();
        let err = store.get(&Handle::new("deadbeef")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn iter_prefix_yields_relative_paths() {
        let store = BlobStore::in_memory();
        store
            .put_at("tool-a/scripts/run.py", Bytes::from_static(b"print()"))
            .await
            .unwrap();
        store
            .put_at("tool-a/data/ref.fa", Bytes::from_static(b">chr1"))
            .await
            .unwrap();
        store
            .put_at("tool-b/other.txt", Bytes::from_static(b"nope"))
            .await
            .unwrap();

        let mut entries = store.iter_prefix("tool-a/").await.unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "data/ref.fa");
        assert_eq!(entries[1].0, "scripts/run.py");
        assert_eq!(entries[1].1, Bytes::from_static(b"print()"));
    }

    #[tokio::test]
    async fn contains_reports_presence() {
        let store = BlobStore::in_memory();
        let handle = store.put(Bytes::from_static(b"x")).await.unwrap();
        assert!(store.contains(&handle).await.unwrap());
        assert!(!store.contains(&Handle::new("missing")).await.unwrap());
    }
}
