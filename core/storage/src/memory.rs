//! In-memory backends for testing and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::blob::BlobStore;
use crate::item::{ItemKind, ItemStore, PageCursor, VaultItem, WriteBatch};
use coffer_common::{Error, ItemId, OwnerId, Result};

/// In-memory blob store.
///
/// All data is stored in memory and lost on drop.
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory blob store.
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    /// Check if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().unwrap().is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        self.blobs.write().unwrap().insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().unwrap().contains_key(key))
    }
}

/// Interior state of [`MemoryItemStore`].
///
/// `rows` is keyed by `(owner, encoded path)` so BTreeMap iteration order is
/// exactly the `(owner, path)` ordering the engine relies on; `by_id` maps an
/// item id back to its current path key.
#[derive(Default)]
struct IndexState {
    rows: BTreeMap<(String, String), VaultItem>,
    by_id: HashMap<(String, ItemId), String>,
}

impl IndexState {
    fn path_of(&self, owner: &OwnerId, id: ItemId) -> Option<String> {
        self.by_id.get(&(owner.as_str().to_string(), id)).cloned()
    }

    fn remove_row(&mut self, owner: &OwnerId, id: ItemId) -> Option<VaultItem> {
        let path = self.path_of(owner, id)?;
        self.by_id.remove(&(owner.as_str().to_string(), id));
        self.rows.remove(&(owner.as_str().to_string(), path))
    }

    fn put_row(&mut self, item: VaultItem) {
        let owner = item.owner_id.as_str().to_string();
        let path = item.path.encoded().to_string();
        self.by_id.insert((owner.clone(), item.id), path.clone());
        self.rows.insert((owner, path), item);
    }
}

/// In-memory ordered item index.
pub struct MemoryItemStore {
    state: Arc<RwLock<IndexState>>,
}

impl MemoryItemStore {
    /// Create a new empty memory item store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(IndexState::default())),
        }
    }

    /// Total row count across owners.
    pub fn len(&self) -> usize {
        self.state.read().unwrap().rows.len()
    }

    /// Check if the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().rows.is_empty()
    }
}

impl Default for MemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, item: VaultItem) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let owner = item.owner_id.as_str().to_string();
        let path = item.path.encoded().to_string();

        if state.rows.contains_key(&(owner.clone(), path.clone())) {
            return Err(Error::Conflict(format!("Path already occupied: {}", path)));
        }
        if state.by_id.contains_key(&(owner, item.id)) {
            return Err(Error::Conflict(format!("Item already exists: {}", item.id)));
        }

        state.put_row(item);
        Ok(())
    }

    async fn get(&self, owner: &OwnerId, id: ItemId) -> Result<Option<VaultItem>> {
        let state = self.state.read().unwrap();
        let path = match state.path_of(owner, id) {
            Some(p) => p,
            None => return Ok(None),
        };
        Ok(state
            .rows
            .get(&(owner.as_str().to_string(), path))
            .cloned())
    }

    async fn children(&self, owner: &OwnerId, parent: Option<ItemId>) -> Result<Vec<VaultItem>> {
        let state = self.state.read().unwrap();
        let mut result: Vec<VaultItem> = state
            .rows
            .values()
            .filter(|item| item.owner_id == *owner && !item.is_deleted && item.parent_id == parent)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(result)
    }

    async fn range(&self, owner: &OwnerId, lower: &str, upper: &str) -> Result<Vec<VaultItem>> {
        let state = self.state.read().unwrap();
        let owner_key = owner.as_str().to_string();
        let start = (owner_key.clone(), lower.to_string());
        let end = (owner_key, upper.to_string());

        Ok(state.rows.range(start..end).map(|(_, v)| v.clone()).collect())
    }

    async fn apply(&self, owner: &OwnerId, batch: WriteBatch) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if let Some(guard) = batch.guard {
            let current = state
                .path_of(owner, guard.item_id)
                .and_then(|p| state.rows.get(&(owner.as_str().to_string(), p)))
                .map(|item| item.version);
            if current != Some(guard.expected_version) {
                return Err(Error::Conflict(format!(
                    "Item {} changed since subtree resolution",
                    guard.item_id
                )));
            }
        }

        for item in batch.upserts {
            // Drop any row the item previously occupied under an old path.
            state.remove_row(owner, item.id);
            state.put_row(item);
        }
        for id in batch.removes {
            state.remove_row(owner, id);
        }
        Ok(())
    }

    async fn list_deleted(&self, owner: &OwnerId) -> Result<Vec<VaultItem>> {
        let state = self.state.read().unwrap();
        Ok(state
            .rows
            .values()
            .filter(|item| item.owner_id == *owner && item.is_deleted)
            .cloned()
            .collect())
    }

    async fn deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<VaultItem>> {
        let state = self.state.read().unwrap();
        let mut result = Vec::new();

        for ((owner, path), item) in state.rows.iter() {
            if let Some(cursor) = after {
                if (owner.as_str(), path.as_str()) <= (cursor.owner.as_str(), cursor.path.as_str())
                {
                    continue;
                }
            }
            if !item.is_deleted {
                continue;
            }
            match item.deleted_at {
                Some(at) if at <= cutoff => result.push(item.clone()),
                _ => continue,
            }
            if result.len() >= limit {
                break;
            }
        }
        Ok(result)
    }

    async fn owner_usage(&self, owner: &OwnerId) -> Result<u64> {
        let state = self.state.read().unwrap();
        Ok(state
            .rows
            .values()
            .filter(|item| {
                item.owner_id == *owner && !item.is_deleted && item.kind == ItemKind::File
            })
            .map(|item| item.size)
            .sum())
    }
}
