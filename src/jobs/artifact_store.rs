//! Write-once storage for uploaded artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid artifact reference: {0}")]
    InvalidReference(String),
}

/// Stores artifacts as `<uuid>.<ext>` files under a single directory.
#[derive(Debug, Clone)]
pub struct ArtifactStorage {
    root: PathBuf,
}

impl ArtifactStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the storage directory.
    pub async fn init(&self) -> Result<(), ArtifactStoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Write `data` under a fresh name and return the artifact reference.
    ///
    /// Files are opened with `create_new`, so an existing artifact is never
    /// overwritten.
    pub async fn store(&self, extension: &str, data: &[u8]) -> Result<String, ArtifactStoreError> {
        let location = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.root.join(&location);

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ArtifactStoreError::AlreadyExists(location))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;

        Ok(location)
    }

    /// Resolve an artifact reference to its path.
    ///
    /// References are plain file names; anything carrying a path separator
    /// or a parent component is refused.
    pub fn resolve(&self, location: &str) -> Result<PathBuf, ArtifactStoreError> {
        let is_plain_name = !location.is_empty()
            && !location.contains(['/', '\\'])
            && location != "."
            && location != "..";
        if !is_plain_name {
            return Err(ArtifactStoreError::InvalidReference(location.to_string()));
        }
        Ok(self.root.join(location))
    }

    /// Remove an artifact, ignoring one that is already gone.
    pub async fn remove(&self, location: &str) -> Result<(), ArtifactStoreError> {
        let path = self.resolve(location)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_writes_bytes_under_unique_names() {
        let dir = TempDir::new().unwrap();
        let storage = ArtifactStorage::new(dir.path().join("images"));
        storage.init().await.unwrap();

        let first = storage.store("png", b"one").await.unwrap();
        let second = storage.store("png", b"two").await.unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with(".png"));
        assert_eq!(
            fs::read(storage.resolve(&first).unwrap()).await.unwrap(),
            b"one"
        );
        assert_eq!(
            fs::read(storage.resolve(&second).unwrap()).await.unwrap(),
            b"two"
        );
    }

    #[test]
    fn test_resolve_rejects_paths() {
        let storage = ArtifactStorage::new("/data/images");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("a/b.png").is_err());
        assert!(storage.resolve("..").is_err());
        assert!(storage.resolve("").is_err());
        assert_eq!(
            storage.resolve("abc.png").unwrap(),
            PathBuf::from("/data/images/abc.png")
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = ArtifactStorage::new(dir.path());
        let location = storage.store("jpg", b"x").await.unwrap();

        storage.remove(&location).await.unwrap();
        storage.remove(&location).await.unwrap();
        assert!(!storage.resolve(&location).unwrap().exists());
    }
}
