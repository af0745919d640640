//! Blob store registry for dynamic backend resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::blob::BlobStore;
use coffer_common::{Error, Result};

/// Factory function type for creating blob stores.
pub type BlobStoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobStore>> + Send + Sync>;

/// Registry of blob store factories.
///
/// Allows dynamic registration and resolution of blob backends by name and
/// JSON configuration, so the embedding application can pick a backend from
/// its own config file.
pub struct BlobStoreRegistry {
    factories: HashMap<String, BlobStoreFactory>,
}

impl BlobStoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a blob store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BlobStoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "Blob backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a blob store by name and configuration.
    ///
    /// # Errors
    /// - Backend not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BlobStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Blob backend '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BlobStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
pub fn create_default_registry() -> BlobStoreRegistry {
    let mut registry = BlobStoreRegistry::new();

    // Memory backend (for testing)
    registry
        .register(
            "memory",
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryBlobStore::new()) as _)),
        )
        .expect("Failed to register memory backend");

    // Local filesystem backend
    registry
        .register(
            "local",
            Box::new(|config| {
                let root = config
                    .get("root")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::InvalidInput("Local backend requires 'root' path".to_string())
                    })?;
                Ok(Arc::new(crate::local::LocalBlobStore::new(root)?) as _)
            }),
        )
        .expect("Failed to register local backend");

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = BlobStoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStore::new()) as _)))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BlobStoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStore::new()) as _)))
            .unwrap();

        let result =
            registry.register("test", Box::new(|_| Ok(Arc::new(MemoryBlobStore::new()) as _)));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = BlobStoreRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_registry_backends() {
        let registry = create_default_registry();
        assert!(registry.has_backend("memory"));
        assert!(registry.has_backend("local"));
    }

    #[tokio::test]
    async fn test_local_backend_requires_root() {
        let registry = create_default_registry();
        assert!(registry.resolve("local", Value::Null).is_err());

        let temp = tempfile::TempDir::new().unwrap();
        let config = serde_json::json!({ "root": temp.path().to_str().unwrap() });
        let store = registry.resolve("local", config).unwrap();
        store.put("abc", vec![1]).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), vec![1]);
    }
}
