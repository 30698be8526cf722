//! # Artifact Envelope and Proxy
//!
//! Files never travel as bare bytes: the worker wraps every artifact in a
//! [`FileEnvelope`] (metadata + contents) and persists it behind a single
//! handle. The lightweight [`ArtifactProxy`] is the metadata-only view that
//! crosses the RPC boundary back to clients.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::{BlobStore, Handle, StoreError};

/// Metadata-only description of a stored artifact, returned in invocation
/// results. The bytes stay in the object store behind `handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactProxy {
    /// Logical (or user provided) name of the artifact.
    pub name: String,
    /// MIME-like format.
    pub format: String,
    /// Original filename.
    pub filename: String,
    /// Size of the contents in bytes.
    pub size: u64,
    /// Handle of the persisted envelope.
    pub handle: Handle,
}

/// A file plus its metadata, serialized as one store object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEnvelope {
    pub name: String,
    pub format: String,
    pub filename: String,
    pub size: u64,
    #[serde(with = "b64_bytes")]
    pub contents: Bytes,
}

impl FileEnvelope {
    /// Wrap an in-memory buffer. Format detection keys off the filename and
    /// falls back to `application/octet-stream` for unknown content.
    pub fn from_buffer(name: impl Into<String>, contents: Bytes) -> Self {
        let name = name.into();
        Self {
            format: detect_format(&name),
            filename: name.clone(),
            size: contents.len() as u64,
            name,
            contents,
        }
    }

    /// Read a local file into an envelope. Does not store it; pair with
    /// [`FileEnvelope::to_store`].
    pub async fn from_local(path: &Path) -> Result<Self, StoreError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("read {}: {e}", path.display())))?;
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_buffer(basename, Bytes::from(contents)))
    }

    /// Override the logical name (the filename stays as read from disk).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Persist the envelope and return the metadata proxy for it.
    pub async fn to_store(&self, store: &BlobStore) -> Result<ArtifactProxy, StoreError> {
        let payload = serde_json::to_vec(self)?;
        let handle = store.put(Bytes::from(payload)).await?;
        Ok(ArtifactProxy {
            name: self.name.clone(),
            format: self.format.clone(),
            filename: self.filename.clone(),
            size: self.size,
            handle,
        })
    }

    /// Fetch and decode the envelope behind a handle.
    pub async fn from_handle(handle: &Handle, store: &BlobStore) -> Result<Self, StoreError> {
        let raw = store.get(handle).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Decode a payload that may or may not be an envelope. Handles minted
    /// by direct `put` calls reference raw bytes; handles minted through the
    /// upload path reference envelopes. Callers staging inputs use this to
    /// accept both.
    pub fn try_parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }
}

/// Guess a MIME type from a filename, defaulting to octet-stream.
pub fn detect_format(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

mod b64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded: String = serde::Deserialize::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelope_round_trips_through_store() {
        let store = BlobStore::in_memory();
        let envelope = FileEnvelope::from_buffer("report.csv", Bytes::from_static(b"a,b\n1,2\n"));

        let proxy = envelope.to_store(&store).await.unwrap();
        assert_eq!(proxy.size, 8);
        assert_eq!(proxy.filename, "report.csv");
        assert_eq!(proxy.format, "text/csv");

        let fetched = FileEnvelope::from_handle(&proxy.handle, &store).await.unwrap();
        assert_eq!(fetched.contents, envelope.contents);
        assert_eq!(fetched.name, "report.csv");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(detect_format("mystery.zzz9"), "application/octet-stream");
        assert_eq!(detect_format("noextension"), "application/octet-stream");
    }

    #[tokio::test]
    async fn from_local_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let envelope = FileEnvelope::from_local(&path).await.unwrap();
        assert_eq!(envelope.name, "input.txt");
        assert_eq!(envelope.filename, "input.txt");
        assert_eq!(envelope.size, 5);
        assert_eq!(envelope.format, "text/plain");
    }

    #[tokio::test]
    async fn proxy_size_matches_stored_bytes() {
        let store = BlobStore::in_memory();
        let contents = Bytes::from(vec![0u8; 1024]);
        let proxy = FileEnvelope::from_buffer("blob.bin", contents.clone())
            .to_store(&store)
            .await
            .unwrap();

        let fetched = FileEnvelope::from_handle(&proxy.handle, &store).await.unwrap();
        assert_eq!(proxy.size as usize, fetched.contents.len());
    }
}
