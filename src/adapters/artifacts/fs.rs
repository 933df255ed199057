//! Filesystem artifact store, laid out as `<root>/<hash[0..2]>/<hash>`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::validate_hash;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ArtifactStore;

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(&content_hash[..2]).join(content_hash)
    }
}

fn persistence_error(content_hash: &str, err: &std::io::Error) -> DomainError {
    DomainError::ArtifactPersistence {
        name: content_hash.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, content_hash: &str, bytes: &[u8]) -> DomainResult<String> {
        validate_hash(content_hash)?;
        let path = self.path_for(content_hash);
        let storage_path = path.to_string_lossy().into_owned();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(storage_path);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error(content_hash, &e))?;
        }

        // Write to a temp name then rename, so a reader never sees a partial file.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| persistence_error(content_hash, &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persistence_error(content_hash, &e))?;

        tracing::debug!(hash = %content_hash, size = bytes.len(), "stored artifact");
        Ok(storage_path)
    }

    async fn get(&self, content_hash: &str) -> DomainResult<Option<Vec<u8>>> {
        validate_hash(content_hash)?;
        match tokio::fs::read(self.path_for(content_hash)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_error(content_hash, &e)),
        }
    }

    async fn exists(&self, content_hash: &str) -> DomainResult<bool> {
        validate_hash(content_hash)?;
        tokio::fs::try_exists(self.path_for(content_hash))
            .await
            .map_err(|e| persistence_error(content_hash, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::artifacts::content_hash;

    #[tokio::test]
    async fn test_put_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let bytes = b"PASS 12 tests".to_vec();
        let hash = content_hash(&bytes);

        let path = store.put(&hash, &bytes).await.unwrap();
        assert!(path.ends_with(&hash));
        assert!(path.contains(&hash[..2]));

        let again = store.put(&hash, &bytes).await.unwrap();
        assert_eq!(path, again);
        assert_eq!(store.get(&hash).await.unwrap(), Some(bytes));
        assert!(store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let hash = content_hash(b"never stored");
        assert_eq!(store.get(&hash).await.unwrap(), None);
        assert!(!store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_unwritable_root_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let store = FsArtifactStore::new(&blocker);

        let hash = content_hash(b"x");
        let err = store.put(&hash, b"x").await.unwrap_err();
        assert!(matches!(err, DomainError::ArtifactPersistence { .. }));
    }
}
