//! Artifact store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Content-addressed storage for artifact bytes.
///
/// Records never inline artifact bytes; they reference them by hash and path.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Durably store `bytes` under `content_hash` and return the storage path.
    ///
    /// Storing the same hash twice is a no-op that returns the same path.
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> DomainResult<String>;

    /// Read back the bytes stored under `content_hash`.
    async fn get(&self, content_hash: &str) -> DomainResult<Option<Vec<u8>>>;

    /// Check whether `content_hash` has been stored.
    async fn exists(&self, content_hash: &str) -> DomainResult<bool>;
}
