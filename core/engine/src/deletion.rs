//! Soft-delete, restore, and permanent deletion.
//!
//! State machine: Active -> SoftDeleted (trash) -> Active (restore) or
//! removed (permanent delete, terminal). Soft deletion flips flags on the
//! rows and tags the cohort with a fresh batch id; restore is scoped to
//! that batch, so descendants trashed earlier under a different batch stay
//! in the trash. Permanent deletion removes the rows under a version guard
//! on the subtree root, then cleans up blobs and dependent records
//! best-effort.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use coffer_common::{BatchId, Error, ItemId, OwnerId, Result};
use coffer_storage::{BlobStore, ItemStore, VaultItem, VersionGuard, WriteBatch};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::cleanup::{CleanupReport, ReferentialCleanup};

/// Result of a soft delete.
#[derive(Debug, Clone, Copy)]
pub struct SoftDeleteOutcome {
    /// Cohort tag shared by every row trashed in this call.
    pub batch_id: BatchId,
    /// Rows trashed (0 when the root was already in the trash).
    pub affected: usize,
}

/// Partial-success report for a permanent deletion.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    /// Index rows removed.
    pub items_removed: usize,
    /// Blobs successfully deleted.
    pub blobs_deleted: usize,
    /// Blob deletes that failed (logged and audited, non-fatal).
    pub blob_failures: usize,
    /// Dependent-store cleanup report.
    pub cleanup: CleanupReport,
}

impl PurgeOutcome {
    fn absorb(&mut self, other: PurgeOutcome) {
        self.items_removed += other.items_removed;
        self.blobs_deleted += other.blobs_deleted;
        self.blob_failures += other.blob_failures;
        self.cleanup.records_removed += other.cleanup.records_removed;
        self.cleanup.failures.extend(other.cleanup.failures);
    }
}

/// Trash and purge operations over the vault item index.
pub struct DeletionEngine {
    items: Arc<dyn ItemStore>,
    blobs: Arc<dyn BlobStore>,
    cleanup: ReferentialCleanup,
    audit: Arc<dyn AuditSink>,
}

impl DeletionEngine {
    /// Create a deletion engine over the given backends.
    pub fn new(
        items: Arc<dyn ItemStore>,
        blobs: Arc<dyn BlobStore>,
        cleanup: ReferentialCleanup,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            items,
            blobs,
            cleanup,
            audit,
        }
    }

    /// Move an item and its active descendants to the trash.
    ///
    /// The subtree is resolved with one range query and every active row is
    /// tagged with one fresh batch id in one batched write. Descendants
    /// already in the trash keep their earlier batch. Calling this on a
    /// root that is already trashed is an idempotent no-op.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    pub async fn soft_delete(&self, owner: &OwnerId, id: ItemId) -> Result<SoftDeleteOutcome> {
        let root = self.require_item(owner, id).await?;
        if root.is_deleted {
            let batch_id = match root.deletion_batch_id {
                Some(batch) => batch,
                None => BatchId::generate(),
            };
            return Ok(SoftDeleteOutcome {
                batch_id,
                affected: 0,
            });
        }

        let batch_id = BatchId::generate();
        let now = Utc::now();
        let (lower, upper) = root.path.descendant_range();
        let descendants = self.items.range(owner, &lower, &upper).await?;

        let mut upserts = Vec::with_capacity(descendants.len() + 1);
        let mut tagged_root = root;
        tagged_root.mark_deleted(batch_id, now);
        upserts.push(tagged_root);
        for mut item in descendants {
            if item.is_deleted {
                continue;
            }
            item.mark_deleted(batch_id, now);
            upserts.push(item);
        }
        let affected = upserts.len();

        self.items.apply(owner, WriteBatch::upserts(upserts)).await?;

        info!(owner = %owner, id = %id, batch = %batch_id, affected, "Subtree soft-deleted");
        self.audit.append(
            AuditEvent::new(owner.clone(), AuditAction::SoftDeleted, Some(id))
                .with_affected(affected)
                .with_range_query(true)
                .with_metadata(serde_json::json!({ "batch_id": batch_id })),
        );
        Ok(SoftDeleteOutcome { batch_id, affected })
    }

    /// Bring a trashed item back, together with the descendants trashed in
    /// the same batch.
    ///
    /// Rows carrying a different batch id were deleted independently and
    /// stay in the trash. A root whose parent is itself still trashed is
    /// rejected: restoring it would leave active rows stranded inside a
    /// trashed subtree, where a later purge of the ancestor would destroy
    /// them. The ancestor has to be restored first.
    ///
    /// # Returns
    /// Number of rows restored.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `InvalidInput` if the item is not in the trash
    /// - `Conflict` if the item's parent is still in the trash
    pub async fn restore(&self, owner: &OwnerId, id: ItemId) -> Result<usize> {
        let root = self.require_item(owner, id).await?;
        if !root.is_deleted {
            return Err(Error::InvalidInput(format!(
                "Item {} is not in the trash",
                id
            )));
        }
        if let Some(parent_id) = root.parent_id {
            if let Some(parent) = self.items.get(owner, parent_id).await? {
                if parent.is_deleted {
                    return Err(Error::Conflict(format!(
                        "Parent folder {} is still in the trash; restore it first",
                        parent_id
                    )));
                }
            }
        }
        let batch_id = root.deletion_batch_id.ok_or_else(|| {
            Error::StorageBackend(format!("Trashed item {} has no deletion batch", id))
        })?;

        let (lower, upper) = root.path.descendant_range();
        let descendants = self.items.range(owner, &lower, &upper).await?;

        let mut upserts = Vec::with_capacity(descendants.len() + 1);
        let mut restored_root = root;
        restored_root.clear_deleted();
        upserts.push(restored_root);
        for mut item in descendants {
            if item.deletion_batch_id != Some(batch_id) {
                continue;
            }
            item.clear_deleted();
            upserts.push(item);
        }
        let affected = upserts.len();

        self.items.apply(owner, WriteBatch::upserts(upserts)).await?;

        info!(owner = %owner, id = %id, batch = %batch_id, affected, "Subtree restored");
        self.audit.append(
            AuditEvent::new(owner.clone(), AuditAction::Restored, Some(id))
                .with_affected(affected)
                .with_range_query(true)
                .with_metadata(serde_json::json!({ "batch_id": batch_id })),
        );
        Ok(affected)
    }

    /// Irreversibly remove an item and its entire subtree, trashed rows
    /// included.
    ///
    /// Rows are removed first, under a version guard on the root, so a
    /// concurrent structural mutation aborts the purge before any blob or
    /// dependent record is touched. Blob deletes and dependent-store
    /// cleanup then run best-effort; their failures are logged, audited,
    /// and reported in the outcome, never returned as errors.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `Conflict` if the subtree root was concurrently mutated
    pub async fn permanent_delete(&self, owner: &OwnerId, id: ItemId) -> Result<PurgeOutcome> {
        let root = self.require_item(owner, id).await?;
        self.purge_root(owner, root).await
    }

    /// Permanently delete a caller-supplied set of items.
    ///
    /// Ids already covered by another folder's subtree within the same
    /// batch are deduplicated so each row is purged exactly once; ids with
    /// no remaining row are skipped.
    pub async fn permanent_delete_batch(
        &self,
        owner: &OwnerId,
        ids: &[ItemId],
    ) -> Result<PurgeOutcome> {
        let mut roots: Vec<VaultItem> = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(item) = self.items.get(owner, id).await? {
                roots.push(item);
            }
        }
        // Path order puts every ancestor before its descendants, so one
        // prefix check against the last accepted root deduplicates; the
        // equality arm catches the same id supplied twice.
        roots.sort_by(|a, b| a.path.cmp(&b.path));

        let mut outcome = PurgeOutcome::default();
        let mut last_root: Option<VaultItem> = None;
        for root in roots {
            if let Some(prev) = &last_root {
                if root.path == prev.path || root.path.is_descendant_of(&prev.path) {
                    continue;
                }
            }
            last_root = Some(root.clone());
            outcome.absorb(self.purge_root(owner, root).await?);
        }
        Ok(outcome)
    }

    /// Purge one resolved root: guarded row removal, then best-effort blob
    /// and dependent-record cleanup.
    async fn purge_root(&self, owner: &OwnerId, root: VaultItem) -> Result<PurgeOutcome> {
        let guard = VersionGuard {
            item_id: root.id,
            expected_version: root.version,
        };
        let (lower, upper) = root.path.descendant_range();
        let descendants = self.items.range(owner, &lower, &upper).await?;

        let mut ids = Vec::with_capacity(descendants.len() + 1);
        let mut storage_keys = Vec::new();
        for item in std::iter::once(&root).chain(descendants.iter()) {
            ids.push(item.id);
            if let Some(key) = &item.storage_key {
                storage_keys.push(key.clone());
            }
        }

        self.items
            .apply(owner, WriteBatch::removes(ids.clone()).with_guard(guard))
            .await?;
        let items_removed = ids.len();

        let mut outcome = PurgeOutcome {
            items_removed,
            ..Default::default()
        };
        for key in &storage_keys {
            match self.blobs.delete(key).await {
                Ok(()) => outcome.blobs_deleted += 1,
                Err(err) => {
                    warn!(owner = %owner, key, error = %err, "Blob delete failed during purge");
                    outcome.blob_failures += 1;
                    self.audit.append(
                        AuditEvent::new(owner.clone(), AuditAction::BlobDeleteFailed, Some(root.id))
                            .with_metadata(serde_json::json!({
                                "storage_key": key,
                                "error": err.to_string(),
                            })),
                    );
                }
            }
        }

        outcome.cleanup = self.cleanup.purge(&ids).await;
        if let Some(err) = outcome.cleanup.to_error() {
            self.audit.append(
                AuditEvent::new(
                    owner.clone(),
                    AuditAction::DependencyCleanupFailed,
                    Some(root.id),
                )
                .with_metadata(serde_json::json!({ "error": err.to_string() })),
            );
        }

        info!(
            owner = %owner,
            id = %root.id,
            items = items_removed,
            blobs = outcome.blobs_deleted,
            "Subtree permanently deleted"
        );
        self.audit.append(
            AuditEvent::new(owner.clone(), AuditAction::PermanentlyDeleted, Some(root.id))
                .with_affected(items_removed)
                .with_range_query(true),
        );
        Ok(outcome)
    }

    async fn require_item(&self, owner: &OwnerId, id: ItemId) -> Result<VaultItem> {
        self.items
            .get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Item {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::cleanup::{DependentStore, MemoryDependentStore};
    use crate::config::EngineConfig;
    use crate::retry::RetryConfig;
    use crate::store::VaultStore;
    use async_trait::async_trait;
    use coffer_storage::{MemoryBlobStore, MemoryItemStore};
    use std::time::Duration;

    struct Fixture {
        store: VaultStore,
        deletion: DeletionEngine,
        items: Arc<MemoryItemStore>,
        blobs: Arc<MemoryBlobStore>,
        dependents: Arc<MemoryDependentStore>,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture() -> Fixture {
        fixture_with(vec![])
    }

    fn fixture_with(extra_stores: Vec<Arc<dyn DependentStore>>) -> Fixture {
        let items = Arc::new(MemoryItemStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let dependents = Arc::new(MemoryDependentStore::new("share_links"));

        let mut stores: Vec<Arc<dyn DependentStore>> = vec![dependents.clone()];
        stores.extend(extra_stores);
        let cleanup = ReferentialCleanup::new(stores).with_retry(
            RetryConfig::new(1)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        Fixture {
            store: VaultStore::new(
                items.clone(),
                blobs.clone(),
                audit.clone(),
                EngineConfig::default(),
            ),
            deletion: DeletionEngine::new(items.clone(), blobs.clone(), cleanup, audit.clone()),
            items,
            blobs,
            dependents,
            audit,
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    /// Folder A containing folder B containing file c.txt.
    async fn seed_tree(fx: &Fixture, owner: &OwnerId) -> (VaultItem, VaultItem, VaultItem) {
        let a = fx.store.create_folder(owner, "A", None).await.unwrap();
        let b = fx.store.create_folder(owner, "B", Some(a.id)).await.unwrap();
        let c = fx
            .store
            .create_file(owner, "c.txt", Some(b.id), b"content".to_vec(), None)
            .await
            .unwrap();
        (a, b, c)
    }

    #[tokio::test]
    async fn test_soft_delete_tags_subtree_with_one_batch() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;

        let outcome = fx.deletion.soft_delete(&owner, a.id).await.unwrap();
        assert_eq!(outcome.affected, 3);

        for id in [a.id, b.id, c.id] {
            let item = fx.items.get(&owner, id).await.unwrap().unwrap();
            assert!(item.is_deleted);
            assert_eq!(item.deletion_batch_id, Some(outcome.batch_id));
        }

        let events = fx.audit.events_for_action(AuditAction::SoftDeleted);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].affected, 3);
        assert!(events[0].range_query_used);
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let fx = fixture();
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        let first = fx.deletion.soft_delete(&owner, a.id).await.unwrap();
        let second = fx.deletion.soft_delete(&owner, a.id).await.unwrap();

        assert_eq!(second.batch_id, first.batch_id);
        assert_eq!(second.affected, 0);
        // No second audit event for the no-op.
        assert_eq!(fx.audit.events_for_action(AuditAction::SoftDeleted).len(), 1);
    }

    #[tokio::test]
    async fn test_restore_is_scoped_to_the_batch() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;

        // c.txt is trashed on its own first, then the whole of A.
        let first = fx.deletion.soft_delete(&owner, c.id).await.unwrap();
        let second = fx.deletion.soft_delete(&owner, a.id).await.unwrap();
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(second.affected, 2);

        let restored = fx.deletion.restore(&owner, a.id).await.unwrap();
        assert_eq!(restored, 2);

        assert!(!fx.items.get(&owner, a.id).await.unwrap().unwrap().is_deleted);
        assert!(!fx.items.get(&owner, b.id).await.unwrap().unwrap().is_deleted);
        // Independently deleted descendant stays in the trash.
        let c_row = fx.items.get(&owner, c.id).await.unwrap().unwrap();
        assert!(c_row.is_deleted);
        assert_eq!(c_row.deletion_batch_id, Some(first.batch_id));
    }

    #[tokio::test]
    async fn test_restore_of_nested_item_requires_parent_first() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;

        fx.deletion.soft_delete(&owner, a.id).await.unwrap();

        // Restoring B alone would leave it active inside A's trashed
        // subtree, where purging A later destroys it.
        let result = fx.deletion.restore(&owner, b.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(fx.items.get(&owner, b.id).await.unwrap().unwrap().is_deleted);

        // Restoring the trashed ancestor brings the batch back together.
        assert_eq!(fx.deletion.restore(&owner, a.id).await.unwrap(), 3);
        for id in [a.id, b.id, c.id] {
            assert!(!fx.items.get(&owner, id).await.unwrap().unwrap().is_deleted);
        }
    }

    #[tokio::test]
    async fn test_restore_requires_trashed_item() {
        let fx = fixture();
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        let result = fx.deletion.restore(&owner, a.id).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_permanent_delete_leaves_nothing_behind() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;
        let storage_key = c.storage_key.clone().unwrap();
        for id in [a.id, b.id, c.id] {
            fx.dependents.insert(id, "record");
        }

        let outcome = fx.deletion.permanent_delete(&owner, a.id).await.unwrap();
        assert_eq!(outcome.items_removed, 3);
        assert_eq!(outcome.blobs_deleted, 1);
        assert_eq!(outcome.blob_failures, 0);
        assert!(outcome.cleanup.is_clean());

        for id in [a.id, b.id, c.id] {
            assert!(fx.items.get(&owner, id).await.unwrap().is_none());
            assert!(!fx.dependents.contains(id));
        }
        assert!(!fx.blobs.exists(&storage_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_delete_survives_cleanup_failure() {
        struct BrokenStore;

        #[async_trait]
        impl DependentStore for BrokenStore {
            fn name(&self) -> &str {
                "incidents"
            }
            async fn delete_by_item_ids(&self, _ids: &[ItemId]) -> Result<u64> {
                Err(Error::StorageBackend("incident store offline".to_string()))
            }
        }

        let fx = fixture_with(vec![Arc::new(BrokenStore)]);
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        let outcome = fx.deletion.permanent_delete(&owner, a.id).await.unwrap();
        assert_eq!(outcome.items_removed, 3);
        assert!(!outcome.cleanup.is_clean());
        assert_eq!(outcome.cleanup.failures[0].store, "incidents");

        // Rows are gone, the failure is audited for reconciliation.
        assert!(fx.items.get(&owner, a.id).await.unwrap().is_none());
        assert_eq!(
            fx.audit
                .events_for_action(AuditAction::DependencyCleanupFailed)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_permanent_delete_conflicts_on_concurrent_mutation() {
        let fx = fixture();
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        // Rename bumps the root's version after our caller observed it.
        let stale_version = a.version;
        fx.store.rename(&owner, a.id, "A2").await.unwrap();

        let mut stale = fx.items.get(&owner, a.id).await.unwrap().unwrap();
        stale.version = stale_version;
        let result = fx.deletion.purge_root(&owner, stale).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // Nothing was removed.
        assert!(fx.items.get(&owner, a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_deduplicates_covered_descendants() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;

        // B and c.txt are already covered by A's subtree.
        let outcome = fx
            .deletion
            .permanent_delete_batch(&owner, &[c.id, a.id, b.id])
            .await
            .unwrap();
        assert_eq!(outcome.items_removed, 3);
        assert_eq!(
            fx.audit
                .events_for_action(AuditAction::PermanentlyDeleted)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_batch_tolerates_duplicate_ids() {
        let fx = fixture();
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        let outcome = fx
            .deletion
            .permanent_delete_batch(&owner, &[a.id, a.id])
            .await
            .unwrap();
        assert_eq!(outcome.items_removed, 3);
        assert_eq!(
            fx.audit
                .events_for_action(AuditAction::PermanentlyDeleted)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_batch_skips_already_purged_ids() {
        let fx = fixture();
        let owner = owner();
        let (a, _, _) = seed_tree(&fx, &owner).await;

        fx.deletion.permanent_delete(&owner, a.id).await.unwrap();
        let outcome = fx
            .deletion
            .permanent_delete_batch(&owner, &[a.id])
            .await
            .unwrap();
        assert_eq!(outcome.items_removed, 0);
    }

    #[tokio::test]
    async fn test_trash_lifecycle_end_to_end() {
        let fx = fixture();
        let owner = owner();
        let (a, b, c) = seed_tree(&fx, &owner).await;
        for id in [a.id, b.id, c.id] {
            fx.dependents.insert(id, "share-link");
        }

        let outcome = fx.deletion.soft_delete(&owner, a.id).await.unwrap();
        let trashed = fx.store.list_deleted(&owner).await.unwrap();
        assert_eq!(trashed.len(), 3);
        assert!(trashed
            .iter()
            .all(|t| t.item.deletion_batch_id == Some(outcome.batch_id)));
        assert!(trashed.iter().all(|t| t.days_remaining == 30));

        fx.deletion
            .permanent_delete_batch(&owner, &[a.id])
            .await
            .unwrap();

        let result = fx.store.get_subtree(&owner, a.id).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        for id in [a.id, b.id, c.id] {
            assert!(!fx.dependents.contains(id));
        }
    }
}
