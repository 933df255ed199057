//! In-memory artifact store for tests and scripted replays.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::validate_hash;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ArtifactStore;

#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, simulating a broken backing store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> DomainResult<String> {
        validate_hash(content_hash)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::ArtifactPersistence {
                name: content_hash.to_string(),
                reason: "artifact store unavailable".to_string(),
            });
        }
        self.blobs
            .write()
            .await
            .entry(content_hash.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(format!("mem://{content_hash}"))
    }

    async fn get(&self, content_hash: &str) -> DomainResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(content_hash).cloned())
    }

    async fn exists(&self, content_hash: &str) -> DomainResult<bool> {
        Ok(self.blobs.read().await.contains_key(content_hash))
    }
}
