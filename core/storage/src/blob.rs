//! Blob store trait definition.

use async_trait::async_trait;

use coffer_common::Result;

/// Key-addressed blob store for encrypted file content.
///
/// The engine treats blob content as opaque bytes; encryption happens
/// before content reaches this interface. Implementations must be safe to
/// call concurrently.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store bytes under the given key, replacing any previous value.
    ///
    /// # Postconditions
    /// - Blob is retrievable under `key`
    /// - Returns the key the blob was stored under
    ///
    /// # Errors
    /// - Backend I/O failure
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// Retrieve the bytes stored under a key.
    ///
    /// # Errors
    /// - Key not found
    /// - Backend I/O failure
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove the blob stored under a key.
    ///
    /// Callers on the purge path treat failures here as non-fatal and log
    /// them; create/download paths treat them as fatal.
    ///
    /// # Errors
    /// - Key not found
    /// - Backend I/O failure
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a key holds a blob.
    async fn exists(&self, key: &str) -> Result<bool>;
}
