//! Local filesystem blob store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::blob::BlobStore;
use coffer_common::{Error, Result};

/// Blob store backed by a local directory.
///
/// Keys are fanned out under a two-character prefix directory to keep
/// individual directories small.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local blob store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Convert a blob key to its filesystem path.
    fn to_fs_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(Error::InvalidInput(format!("Invalid blob key: {}", key)));
        }
        let prefix = if key.len() >= 2 { &key[..2] } else { key };
        Ok(self.root.join(prefix).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let fs_path = self.to_fs_path(key)?;

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&fs_path, &bytes).await?;

        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(key)?;

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }

        Ok(fs::read(&fs_path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let fs_path = self.to_fs_path(key)?;

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }

        fs::remove_file(&fs_path).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.to_fs_path(key)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_get() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let data = b"Hello, Local!".to_vec();

        store.put("abc123", data.clone()).await.unwrap();
        let fetched = store.get("abc123").await.unwrap();

        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn test_local_delete() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();

        store.put("abc123", vec![1, 2, 3]).await.unwrap();
        assert!(store.exists("abc123").await.unwrap());

        store.delete("abc123").await.unwrap();
        assert!(!store.exists("abc123").await.unwrap());
        assert!(store.delete("abc123").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();

        assert!(store.put("../escape", vec![1]).await.is_err());
        assert!(store.put("a/b", vec![1]).await.is_err());
        assert!(store.put("", vec![1]).await.is_err());
    }
}
