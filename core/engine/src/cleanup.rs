//! Referential cleanup of records in dependent stores.
//!
//! After permanent deletion, records keyed by the removed item ids (share
//! links, encryption metadata, security incidents) must be deleted from
//! their own stores. There are no transactional guarantees across stores:
//! cleanup is best-effort, failures never abort the primary deletion, and
//! each failure is logged and reported for out-of-band reconciliation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::retry::{retry_with_config, RetryConfig};
use coffer_common::{Error, ItemId, Result};

/// A store holding records keyed by vault item id.
#[async_trait]
pub trait DependentStore: Send + Sync {
    /// Name of the store (e.g., "share_links").
    fn name(&self) -> &str;

    /// Delete every record referencing one of the given item ids.
    ///
    /// # Returns
    /// Number of records removed.
    async fn delete_by_item_ids(&self, ids: &[ItemId]) -> Result<u64>;
}

/// One dependent store that could not be cleaned up.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub store: String,
    pub error: String,
}

/// Aggregated outcome of a cleanup pass across all dependent stores.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Total dependent records removed.
    pub records_removed: u64,
    /// Stores that failed even after retries.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// True when every store was cleaned successfully.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse the per-store failures into one error, if any.
    pub fn to_error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let stores: Vec<&str> = self.failures.iter().map(|f| f.store.as_str()).collect();
        Some(Error::DependencyCleanup(format!(
            "{} dependent store(s) not cleaned: {}",
            self.failures.len(),
            stores.join(", ")
        )))
    }
}

/// Best-effort cleanup runner over a set of dependent stores.
pub struct ReferentialCleanup {
    stores: Vec<Arc<dyn DependentStore>>,
    retry: RetryConfig,
}

impl ReferentialCleanup {
    /// Create a cleanup runner over the given stores.
    pub fn new(stores: Vec<Arc<dyn DependentStore>>) -> Self {
        Self {
            stores,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Delete dependent records for the given item ids in every store.
    ///
    /// Never returns an error: per-store failures are retried with backoff,
    /// then logged and aggregated into the report.
    pub async fn purge(&self, ids: &[ItemId]) -> CleanupReport {
        let mut report = CleanupReport::default();
        if ids.is_empty() {
            return report;
        }

        for store in &self.stores {
            let result =
                retry_with_config(&self.retry, || store.delete_by_item_ids(ids)).await;
            match result {
                Ok(removed) => {
                    debug!(
                        store = store.name(),
                        removed, "Dependent records cleaned up"
                    );
                    report.records_removed += removed;
                }
                Err(err) => {
                    warn!(
                        store = store.name(),
                        error = %err,
                        ids = ids.len(),
                        "Dependent-store cleanup failed; eligible for reconciliation"
                    );
                    report.failures.push(CleanupFailure {
                        store: store.name().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }
}

/// In-memory dependent store, for tests and embedding.
pub struct MemoryDependentStore {
    name: String,
    records: RwLock<HashMap<ItemId, Vec<String>>>,
}

impl MemoryDependentStore {
    /// Create a named empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a record payload to an item id.
    pub fn insert(&self, id: ItemId, payload: impl Into<String>) {
        self.records
            .write()
            .unwrap()
            .entry(id)
            .or_default()
            .push(payload.into());
    }

    /// Whether any record references the item id.
    pub fn contains(&self, id: ItemId) -> bool {
        self.records.read().unwrap().contains_key(&id)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().values().map(Vec::len).sum()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

#[async_trait]
impl DependentStore for MemoryDependentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn delete_by_item_ids(&self, ids: &[ItemId]) -> Result<u64> {
        let mut records = self.records.write().unwrap();
        let mut removed = 0u64;
        for id in ids {
            if let Some(payloads) = records.remove(id) {
                removed += payloads.len() as u64;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails a configurable number of times before succeeding.
    struct FlakyStore {
        inner: MemoryDependentStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl DependentStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn delete_by_item_ids(&self, ids: &[ItemId]) -> Result<u64> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(Error::StorageBackend("dependent store offline".to_string()));
            }
            self.inner.delete_by_item_ids(ids).await
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_purge_removes_records_from_all_stores() {
        let links = Arc::new(MemoryDependentStore::new("share_links"));
        let meta = Arc::new(MemoryDependentStore::new("encryption_metadata"));
        let id = ItemId::generate();
        links.insert(id, "link-1");
        links.insert(id, "link-2");
        meta.insert(id, "key-material");

        let cleanup = ReferentialCleanup::new(vec![links.clone(), meta.clone()]);
        let report = cleanup.purge(&[id]).await;

        assert!(report.is_clean());
        assert_eq!(report.records_removed, 3);
        assert!(!links.contains(id));
        assert!(!meta.contains(id));
    }

    #[tokio::test]
    async fn test_purge_retries_transient_failure() {
        let id = ItemId::generate();
        let flaky = FlakyStore {
            inner: MemoryDependentStore::new("flaky"),
            failures_left: AtomicU32::new(1),
        };
        flaky.inner.insert(id, "record");

        let cleanup =
            ReferentialCleanup::new(vec![Arc::new(flaky)]).with_retry(fast_retry());
        let report = cleanup.purge(&[id]).await;

        assert!(report.is_clean());
        assert_eq!(report.records_removed, 1);
    }

    #[tokio::test]
    async fn test_purge_reports_persistent_failure_without_aborting() {
        let id = ItemId::generate();
        let healthy = Arc::new(MemoryDependentStore::new("incidents"));
        healthy.insert(id, "incident");
        let broken = FlakyStore {
            inner: MemoryDependentStore::new("flaky"),
            failures_left: AtomicU32::new(u32::MAX),
        };

        let cleanup = ReferentialCleanup::new(vec![Arc::new(broken), healthy.clone()])
            .with_retry(fast_retry());
        let report = cleanup.purge(&[id]).await;

        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].store, "flaky");
        assert!(matches!(
            report.to_error(),
            Some(Error::DependencyCleanup(_))
        ));
        // The healthy store was still cleaned.
        assert!(!healthy.contains(id));
    }

    #[tokio::test]
    async fn test_purge_empty_ids_is_noop() {
        let links = Arc::new(MemoryDependentStore::new("share_links"));
        let cleanup = ReferentialCleanup::new(vec![links]);
        let report = cleanup.purge(&[]).await;
        assert!(report.is_clean());
        assert_eq!(report.records_removed, 0);
    }
}
