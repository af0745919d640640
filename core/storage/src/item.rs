//! Vault item model and the ordered metadata index trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coffer_common::{BatchId, ItemId, MaterializedPath, OwnerId, Result};

/// Kind of vault item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// A single row in the vault item index.
///
/// The materialized `path` is the sortable key: a folder's entire subtree
/// is the half-open key range produced by
/// [`MaterializedPath::descendant_range`]. Soft deletion flips flags on the
/// row; only permanent deletion removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultItem {
    /// Unique item identifier.
    pub id: ItemId,
    /// Owner this item belongs to.
    pub owner_id: OwnerId,
    /// File or folder.
    pub kind: ItemKind,
    /// Display name, unique among siblings.
    pub name: String,
    /// Parent folder (None = vault root).
    pub parent_id: Option<ItemId>,
    /// Materialized ancestor chain terminating in this item's id.
    pub path: MaterializedPath,
    /// Content size in bytes (0 for folders).
    pub size: u64,
    /// MIME type (files only).
    pub mime_type: Option<String>,
    /// Blob store key (None for folders).
    pub storage_key: Option<String>,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// When the item was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Cohort tag of the soft-delete operation that trashed this item.
    pub deletion_batch_id: Option<BatchId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Optimistic version stamp, bumped on every mutation.
    pub version: u64,
}

impl VaultItem {
    /// Create a new folder row. `path` must terminate in `id`.
    pub fn new_folder(
        id: ItemId,
        owner_id: OwnerId,
        name: impl Into<String>,
        parent_id: Option<ItemId>,
        path: MaterializedPath,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            kind: ItemKind::Folder,
            name: name.into(),
            parent_id,
            path,
            size: 0,
            mime_type: None,
            storage_key: None,
            is_deleted: false,
            deleted_at: None,
            deletion_batch_id: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Create a new file row. `path` must terminate in `id`.
    pub fn new_file(
        id: ItemId,
        owner_id: OwnerId,
        name: impl Into<String>,
        parent_id: Option<ItemId>,
        path: MaterializedPath,
        size: u64,
        mime_type: Option<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            kind: ItemKind::File,
            name: name.into(),
            parent_id,
            path,
            size,
            mime_type,
            storage_key: Some(storage_key.into()),
            is_deleted: false,
            deleted_at: None,
            deletion_batch_id: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    /// Bump the mutation stamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Flag the row as trashed under the given batch.
    pub fn mark_deleted(&mut self, batch: BatchId, at: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
        self.deletion_batch_id = Some(batch);
        self.touch();
    }

    /// Clear trash flags (restore).
    pub fn clear_deleted(&mut self) {
        self.is_deleted = false;
        self.deleted_at = None;
        self.deletion_batch_id = None;
        self.touch();
    }
}

/// Optimistic concurrency guard for a batched write.
///
/// The write fails with `Conflict` if the named item's version differs from
/// `expected_version` at apply time, i.e. the subtree root changed between
/// resolution and write.
#[derive(Debug, Clone, Copy)]
pub struct VersionGuard {
    pub item_id: ItemId,
    pub expected_version: u64,
}

/// One atomic batched write against the item index.
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Rows to insert or replace (keyed by item id).
    pub upserts: Vec<VaultItem>,
    /// Item ids whose rows are removed.
    pub removes: Vec<ItemId>,
    /// Optional structural-mutation guard.
    pub guard: Option<VersionGuard>,
}

impl WriteBatch {
    /// Batch of upserts only.
    pub fn upserts(items: Vec<VaultItem>) -> Self {
        Self {
            upserts: items,
            ..Default::default()
        }
    }

    /// Batch of row removals only.
    pub fn removes(ids: Vec<ItemId>) -> Self {
        Self {
            removes: ids,
            ..Default::default()
        }
    }

    /// Attach a version guard.
    pub fn with_guard(mut self, guard: VersionGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Resumable position in the global `(owner, path)` ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub owner: String,
    pub path: String,
}

/// Ordered metadata index over vault items.
///
/// Rows sort by `(owner_id, path)`; the whole engine leans on that ordering
/// so a subtree resolve is exactly one call to [`range`](Self::range).
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Insert a new row.
    ///
    /// # Errors
    /// - `Conflict` if the id or path is already taken for this owner
    async fn insert(&self, item: VaultItem) -> Result<()>;

    /// Fetch a row by id, deleted or not.
    async fn get(&self, owner: &OwnerId, id: ItemId) -> Result<Option<VaultItem>>;

    /// Active direct children of a folder (None = root level), name-ordered.
    async fn children(&self, owner: &OwnerId, parent: Option<ItemId>) -> Result<Vec<VaultItem>>;

    /// All rows whose path lies in `[lower, upper)`, path-ordered.
    ///
    /// Includes soft-deleted rows; callers filter. This is the single
    /// subtree-resolution query - cost is proportional to subtree size,
    /// independent of depth.
    async fn range(&self, owner: &OwnerId, lower: &str, upper: &str) -> Result<Vec<VaultItem>>;

    /// Apply one batched write atomically.
    ///
    /// # Errors
    /// - `Conflict` if the batch carries a [`VersionGuard`] and the guarded
    ///   row is missing or its version changed
    async fn apply(&self, owner: &OwnerId, batch: WriteBatch) -> Result<()>;

    /// All soft-deleted rows for an owner, path-ordered.
    async fn list_deleted(&self, owner: &OwnerId) -> Result<Vec<VaultItem>>;

    /// Soft-deleted rows with `deleted_at <= cutoff`, across all owners,
    /// ordered by `(owner, path)`, starting strictly after `after`,
    /// at most `limit` rows.
    async fn deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<VaultItem>>;

    /// Total size of an owner's active files (quota accounting).
    async fn owner_usage(&self, owner: &OwnerId) -> Result<u64>;
}
