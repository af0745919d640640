//! Vault item operations: CRUD, listing, subtree retrieval, rename, move.
//!
//! Every operation that touches a subtree resolves it with one ordered
//! range query over the materialized-path index and commits with one
//! batched write. Structural mutations carry an optimistic version guard
//! on the subtree root, so a concurrent move of the same item surfaces as
//! `Conflict` instead of silently interleaving path rewrites.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use coffer_common::{Error, ItemId, MaterializedPath, OwnerId, Result};
use coffer_storage::{BlobStore, ItemKind, ItemStore, VaultItem, VersionGuard, WriteBatch};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::EngineConfig;

/// Aggregate counts for a folder subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtreeStats {
    /// Active folders in the subtree, including the root.
    pub folders: usize,
    /// Active files in the subtree.
    pub files: usize,
    /// Total size of active files in bytes.
    pub total_bytes: u64,
}

/// A trashed item together with how long it remains recoverable.
#[derive(Debug, Clone)]
pub struct TrashedItem {
    pub item: VaultItem,
    /// Days until the retention sweeper may purge it (negative = overdue).
    pub days_remaining: i64,
}

/// Primary interface for vault item operations.
pub struct VaultStore {
    items: Arc<dyn ItemStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl VaultStore {
    /// Create a vault store over the given backends.
    pub fn new(
        items: Arc<dyn ItemStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            items,
            blobs,
            audit,
            config,
        }
    }

    /// Create a folder under the given parent (None = vault root).
    ///
    /// # Errors
    /// - `NotFound` if the parent does not exist or is trashed
    /// - `InvalidInput` if the parent is a file or nesting exceeds the
    ///   path-length bound
    /// - `Conflict` if a sibling already has this name
    pub async fn create_folder(
        &self,
        owner: &OwnerId,
        name: &str,
        parent: Option<ItemId>,
    ) -> Result<VaultItem> {
        let name = validate_name(name)?;
        let parent_path = self.resolve_parent(owner, parent).await?;
        self.check_sibling_collision(owner, parent, &name, None)
            .await?;

        let id = ItemId::generate();
        let path = self.path_for(parent_path.as_ref(), id)?;
        let item = VaultItem::new_folder(id, owner.clone(), name, parent, path);

        self.items.insert(item.clone()).await?;
        debug!(owner = %owner, id = %id, "Folder created");
        self.audit.append(AuditEvent::new(
            owner.clone(),
            AuditAction::ItemCreated,
            Some(id),
        ));
        Ok(item)
    }

    /// Create a file under the given parent and store its content.
    ///
    /// The quota check happens before the blob write, so a rejected upload
    /// leaves nothing behind in the blob store.
    ///
    /// # Errors
    /// - `NotFound` if the parent does not exist or is trashed
    /// - `Conflict` if a sibling already has this name
    /// - `QuotaExceeded` if the owner's active usage plus this file would
    ///   exceed the configured quota
    pub async fn create_file(
        &self,
        owner: &OwnerId,
        name: &str,
        parent: Option<ItemId>,
        content: Vec<u8>,
        mime_type: Option<String>,
    ) -> Result<VaultItem> {
        let name = validate_name(name)?;
        let parent_path = self.resolve_parent(owner, parent).await?;
        self.check_sibling_collision(owner, parent, &name, None)
            .await?;

        let size = content.len() as u64;
        if let Some(quota) = self.config.quota_bytes {
            let usage = self.items.owner_usage(owner).await?;
            if usage.saturating_add(size) > quota {
                return Err(Error::QuotaExceeded(format!(
                    "Storing {} bytes would exceed quota of {} bytes (current usage {})",
                    size, quota, usage
                )));
            }
        }

        let id = ItemId::generate();
        let path = self.path_for(parent_path.as_ref(), id)?;
        let storage_key = Uuid::new_v4().to_string();
        self.blobs.put(&storage_key, content).await?;

        let item = VaultItem::new_file(
            id,
            owner.clone(),
            name,
            parent,
            path,
            size,
            mime_type,
            storage_key,
        );
        self.items.insert(item.clone()).await?;
        debug!(owner = %owner, id = %id, size, "File created");
        self.audit.append(AuditEvent::new(
            owner.clone(),
            AuditAction::ItemCreated,
            Some(id),
        ));
        Ok(item)
    }

    /// Fetch an item by id, trashed or not.
    ///
    /// # Errors
    /// - `NotFound` if no row exists for this owner and id
    pub async fn get_item(&self, owner: &OwnerId, id: ItemId) -> Result<VaultItem> {
        self.items
            .get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Item {} not found", id)))
    }

    /// Read a file's content from the blob store.
    ///
    /// # Errors
    /// - `NotFound` if the item is missing or trashed
    /// - `InvalidInput` if the item is a folder
    pub async fn read_file(&self, owner: &OwnerId, id: ItemId) -> Result<Vec<u8>> {
        let item = self.get_item(owner, id).await?;
        if item.is_deleted {
            return Err(Error::NotFound(format!("Item {} is in the trash", id)));
        }
        let key = match (&item.kind, &item.storage_key) {
            (ItemKind::File, Some(key)) => key.clone(),
            (ItemKind::Folder, _) => {
                return Err(Error::InvalidInput(format!("Item {} is a folder", id)))
            }
            (ItemKind::File, None) => {
                return Err(Error::StorageBackend(format!(
                    "File {} has no storage key",
                    id
                )))
            }
        };
        self.blobs.get(&key).await
    }

    /// Active direct children of a folder (None = root level), name-ordered.
    ///
    /// # Errors
    /// - `NotFound` if a named parent does not exist or is trashed
    /// - `InvalidInput` if the named parent is a file
    pub async fn get_children(
        &self,
        owner: &OwnerId,
        parent: Option<ItemId>,
    ) -> Result<Vec<VaultItem>> {
        self.resolve_parent(owner, parent).await?;
        self.items.children(owner, parent).await
    }

    /// An item and all its active descendants, path-ordered, root first.
    ///
    /// Resolution is a single range query regardless of nesting depth.
    ///
    /// # Errors
    /// - `NotFound` if the root is missing or trashed
    pub async fn get_subtree(&self, owner: &OwnerId, root: ItemId) -> Result<Vec<VaultItem>> {
        let root_item = self.get_item(owner, root).await?;
        if root_item.is_deleted {
            return Err(Error::NotFound(format!("Item {} is in the trash", root)));
        }

        let (lower, upper) = root_item.path.descendant_range();
        let descendants = self.items.range(owner, &lower, &upper).await?;

        let mut result = Vec::with_capacity(descendants.len() + 1);
        result.push(root_item);
        result.extend(descendants.into_iter().filter(|item| !item.is_deleted));
        Ok(result)
    }

    /// Aggregate counts over an active subtree.
    pub async fn subtree_stats(&self, owner: &OwnerId, root: ItemId) -> Result<SubtreeStats> {
        let items = self.get_subtree(owner, root).await?;
        let mut stats = SubtreeStats::default();
        for item in &items {
            match item.kind {
                ItemKind::Folder => stats.folders += 1,
                ItemKind::File => {
                    stats.files += 1;
                    stats.total_bytes += item.size;
                }
            }
        }
        Ok(stats)
    }

    /// Rename an item in place.
    ///
    /// # Errors
    /// - `NotFound` if the item is missing or trashed
    /// - `Conflict` if a sibling already has the new name, or the item was
    ///   concurrently mutated
    pub async fn rename(&self, owner: &OwnerId, id: ItemId, new_name: &str) -> Result<VaultItem> {
        let new_name = validate_name(new_name)?;
        let mut item = self.get_item(owner, id).await?;
        if item.is_deleted {
            return Err(Error::NotFound(format!("Item {} is in the trash", id)));
        }
        if item.name == new_name {
            return Ok(item);
        }
        self.check_sibling_collision(owner, item.parent_id, &new_name, Some(id))
            .await?;

        let guard = VersionGuard {
            item_id: id,
            expected_version: item.version,
        };
        item.name = new_name;
        item.touch();

        self.items
            .apply(owner, WriteBatch::upserts(vec![item.clone()]).with_guard(guard))
            .await?;
        self.audit.append(AuditEvent::new(
            owner.clone(),
            AuditAction::ItemRenamed,
            Some(id),
        ));
        Ok(item)
    }

    /// Move an item (and, for folders, its entire subtree) under a new
    /// parent.
    ///
    /// The subtree is resolved with one range query, every row's path is
    /// rebased onto the destination, and all rewrites commit in one batched
    /// write guarded by the root's version stamp. Trashed descendants move
    /// with the subtree so a later restore lands them in the right place.
    ///
    /// # Errors
    /// - `NotFound` if the item or destination parent is missing or trashed
    /// - `InvalidInput` if the destination is a file, or lies inside the
    ///   moved folder's own subtree, or nesting would exceed the
    ///   path-length bound
    /// - `Conflict` if the destination has a same-named sibling, or the
    ///   item was concurrently mutated
    pub async fn move_item(
        &self,
        owner: &OwnerId,
        id: ItemId,
        new_parent: Option<ItemId>,
    ) -> Result<VaultItem> {
        let root = self.get_item(owner, id).await?;
        if root.is_deleted {
            return Err(Error::NotFound(format!("Item {} is in the trash", id)));
        }
        if root.parent_id == new_parent {
            return Ok(root);
        }

        let parent_path = self.resolve_parent(owner, new_parent).await?;
        if let Some(dest) = &parent_path {
            if *dest == root.path || dest.is_descendant_of(&root.path) {
                return Err(Error::InvalidInput(format!(
                    "Cannot move {} into its own subtree",
                    id
                )));
            }
        }
        self.check_sibling_collision(owner, new_parent, &root.name, Some(id))
            .await?;

        let old_path = root.path.clone();
        let new_path = self.path_for(parent_path.as_ref(), id)?;
        let guard = VersionGuard {
            item_id: id,
            expected_version: root.version,
        };

        // Trashed rows are included so the whole subtree stays path-consistent.
        let (lower, upper) = old_path.descendant_range();
        let descendants = self.items.range(owner, &lower, &upper).await?;

        let mut moved_root = root;
        moved_root.parent_id = new_parent;
        moved_root.path = new_path.clone();
        moved_root.touch();

        let mut upserts = Vec::with_capacity(descendants.len() + 1);
        upserts.push(moved_root.clone());
        for mut item in descendants {
            let rebased = item.path.rebase(&old_path, &new_path)?;
            if rebased.encoded().len() > self.config.max_path_len {
                return Err(Error::InvalidInput(format!(
                    "Move would push {} past the maximum path length {}",
                    item.id, self.config.max_path_len
                )));
            }
            item.path = rebased;
            item.touch();
            upserts.push(item);
        }
        let affected = upserts.len();

        self.items
            .apply(owner, WriteBatch::upserts(upserts).with_guard(guard))
            .await?;

        info!(owner = %owner, id = %id, affected, "Item moved");
        self.audit.append(
            AuditEvent::new(owner.clone(), AuditAction::ItemMoved, Some(id))
                .with_affected(affected)
                .with_range_query(true),
        );
        Ok(moved_root)
    }

    /// All trashed items for an owner, path-ordered, annotated with the
    /// days left in the retention window.
    pub async fn list_deleted(&self, owner: &OwnerId) -> Result<Vec<TrashedItem>> {
        let retention = i64::from(self.config.retention_days);
        let now = Utc::now();
        let items = self.items.list_deleted(owner).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let elapsed = item
                    .deleted_at
                    .map(|at| (now - at).num_days())
                    .unwrap_or(0);
                TrashedItem {
                    item,
                    days_remaining: retention - elapsed,
                }
            })
            .collect())
    }

    /// Resolve a parent reference to its path (None = vault root).
    async fn resolve_parent(
        &self,
        owner: &OwnerId,
        parent: Option<ItemId>,
    ) -> Result<Option<MaterializedPath>> {
        match parent {
            None => Ok(None),
            Some(pid) => {
                let item = self.get_item(owner, pid).await?;
                if item.is_deleted {
                    return Err(Error::NotFound(format!("Parent {} is in the trash", pid)));
                }
                if !item.is_folder() {
                    return Err(Error::InvalidInput(format!("Parent {} is not a folder", pid)));
                }
                Ok(Some(item.path))
            }
        }
    }

    /// Build the materialized path for an item under the resolved parent.
    fn path_for(
        &self,
        parent_path: Option<&MaterializedPath>,
        id: ItemId,
    ) -> Result<MaterializedPath> {
        match parent_path {
            None => Ok(MaterializedPath::root(id)),
            Some(parent) => parent.child_checked(id, self.config.max_path_len),
        }
    }

    /// Reject the name if an active sibling already carries it.
    async fn check_sibling_collision(
        &self,
        owner: &OwnerId,
        parent: Option<ItemId>,
        name: &str,
        exclude: Option<ItemId>,
    ) -> Result<()> {
        let siblings = self.items.children(owner, parent).await?;
        let collides = siblings.iter().any(|sibling| {
            Some(sibling.id) != exclude && self.names_equal(&sibling.name, name)
        });
        if collides {
            return Err(Error::Conflict(format!(
                "An item named '{}' already exists here",
                name
            )));
        }
        Ok(())
    }

    fn names_equal(&self, a: &str, b: &str) -> bool {
        if self.config.case_insensitive_names {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Item name cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}
