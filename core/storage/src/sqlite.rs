//! SQLite-backed item index.
//!
//! Persists vault metadata with `(owner_id, path)` as the primary key, so a
//! subtree resolve compiles to one `path >= ?1 AND path < ?2` range scan
//! over the clustered index.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::item::{ItemKind, ItemStore, PageCursor, VaultItem, WriteBatch};
use coffer_common::{BatchId, Error, ItemId, MaterializedPath, OwnerId, Result};

const COLUMNS: &str = "owner_id, id, kind, name, parent_id, path, size, mime_type, \
     storage_key, is_deleted, deleted_at, deletion_batch_id, created_at, updated_at, version";

/// SQLite-backed [`ItemStore`].
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Create or open an item index database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vault_items (
                owner_id          TEXT NOT NULL,
                id                TEXT NOT NULL,
                kind              TEXT NOT NULL,
                name              TEXT NOT NULL,
                parent_id         TEXT,
                path              TEXT NOT NULL,
                size              INTEGER NOT NULL,
                mime_type         TEXT,
                storage_key       TEXT,
                is_deleted        INTEGER NOT NULL,
                deleted_at        INTEGER,
                deletion_batch_id TEXT,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL,
                version           INTEGER NOT NULL,
                PRIMARY KEY (owner_id, path)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_owner_id
                ON vault_items(owner_id, id);
            CREATE INDEX IF NOT EXISTS idx_items_parent
                ON vault_items(owner_id, parent_id);
            CREATE INDEX IF NOT EXISTS idx_items_trash
                ON vault_items(is_deleted, deleted_at);
            "#,
        )
        .map_err(db_err)?;

        info!("Item index opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory index (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

/// Map backend errors, surfacing constraint violations as `Conflict`.
fn db_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("Item index constraint violated: {}", e))
        }
        _ => Error::StorageBackend(format!("Item index error: {}", e)),
    }
}

/// Row image with plain SQL types; converted to [`VaultItem`] outside the
/// rusqlite mapping closure so parse failures surface as our own errors.
struct RawRow {
    owner_id: String,
    id: String,
    kind: String,
    name: String,
    parent_id: Option<String>,
    path: String,
    size: i64,
    mime_type: Option<String>,
    storage_key: Option<String>,
    is_deleted: i64,
    deleted_at: Option<i64>,
    deletion_batch_id: Option<String>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        owner_id: row.get(0)?,
        id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        parent_id: row.get(4)?,
        path: row.get(5)?,
        size: row.get(6)?,
        mime_type: row.get(7)?,
        storage_key: row.get(8)?,
        is_deleted: row.get(9)?,
        deleted_at: row.get(10)?,
        deletion_batch_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        version: row.get(14)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Serialization(format!("Invalid timestamp: {}", ms)))
}

impl TryFrom<RawRow> for VaultItem {
    type Error = Error;

    fn try_from(raw: RawRow) -> Result<VaultItem> {
        let kind = match raw.kind.as_str() {
            "file" => ItemKind::File,
            "folder" => ItemKind::Folder,
            other => {
                return Err(Error::Serialization(format!("Unknown item kind: {}", other)));
            }
        };
        Ok(VaultItem {
            id: ItemId::parse(&raw.id)?,
            owner_id: OwnerId::new(raw.owner_id)?,
            kind,
            name: raw.name,
            parent_id: raw.parent_id.as_deref().map(ItemId::parse).transpose()?,
            path: MaterializedPath::parse(&raw.path)?,
            size: raw.size as u64,
            mime_type: raw.mime_type,
            storage_key: raw.storage_key,
            is_deleted: raw.is_deleted != 0,
            deleted_at: raw.deleted_at.map(millis_to_datetime).transpose()?,
            deletion_batch_id: raw
                .deletion_batch_id
                .as_deref()
                .map(BatchId::parse)
                .transpose()?,
            created_at: millis_to_datetime(raw.created_at)?,
            updated_at: millis_to_datetime(raw.updated_at)?,
            version: raw.version as u64,
        })
    }
}

fn insert_row(tx: &Transaction<'_>, item: &VaultItem) -> rusqlite::Result<()> {
    let kind = match item.kind {
        ItemKind::File => "file",
        ItemKind::Folder => "folder",
    };
    tx.execute(
        r#"
        INSERT INTO vault_items
        (owner_id, id, kind, name, parent_id, path, size, mime_type,
         storage_key, is_deleted, deleted_at, deletion_batch_id,
         created_at, updated_at, version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            item.owner_id.as_str(),
            item.id.to_string(),
            kind,
            item.name,
            item.parent_id.map(|p| p.to_string()),
            item.path.encoded(),
            item.size as i64,
            item.mime_type,
            item.storage_key,
            item.is_deleted as i64,
            item.deleted_at.map(|t| t.timestamp_millis()),
            item.deletion_batch_id.map(|b| b.to_string()),
            item.created_at.timestamp_millis(),
            item.updated_at.timestamp_millis(),
            item.version as i64,
        ],
    )?;
    Ok(())
}

fn collect_items(rows: Vec<RawRow>) -> Result<Vec<VaultItem>> {
    rows.into_iter().map(VaultItem::try_from).collect()
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, item: VaultItem) -> Result<()> {
        debug!(item = %item.id, path = %item.path, "Inserting item row");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        insert_row(&tx, &item).map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    async fn get(&self, owner: &OwnerId, id: ItemId) -> Result<Option<VaultItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM vault_items WHERE owner_id = ?1 AND id = ?2",
                COLUMNS
            ))
            .map_err(db_err)?;

        match stmt.query_row(params![owner.as_str(), id.to_string()], read_row) {
            Ok(raw) => Ok(Some(VaultItem::try_from(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn children(&self, owner: &OwnerId, parent: Option<ItemId>) -> Result<Vec<VaultItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM vault_items \
                 WHERE owner_id = ?1 AND is_deleted = 0 AND parent_id IS ?2 \
                 ORDER BY name COLLATE NOCASE",
                COLUMNS
            ))
            .map_err(db_err)?;

        let raws = stmt
            .query_map(
                params![owner.as_str(), parent.map(|p| p.to_string())],
                read_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        collect_items(raws)
    }

    async fn range(&self, owner: &OwnerId, lower: &str, upper: &str) -> Result<Vec<VaultItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM vault_items \
                 WHERE owner_id = ?1 AND path >= ?2 AND path < ?3 \
                 ORDER BY path",
                COLUMNS
            ))
            .map_err(db_err)?;

        let raws = stmt
            .query_map(params![owner.as_str(), lower, upper], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        collect_items(raws)
    }

    async fn apply(&self, owner: &OwnerId, batch: WriteBatch) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        if let Some(guard) = batch.guard {
            let version: Option<i64> = match tx.query_row(
                "SELECT version FROM vault_items WHERE owner_id = ?1 AND id = ?2",
                params![owner.as_str(), guard.item_id.to_string()],
                |row| row.get(0),
            ) {
                Ok(v) => Some(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(db_err(e)),
            };
            if version != Some(guard.expected_version as i64) {
                return Err(Error::Conflict(format!(
                    "Item {} changed since subtree resolution",
                    guard.item_id
                )));
            }
        }

        for item in &batch.upserts {
            // Replace by id so a path rewrite cannot leave a stale row behind.
            tx.execute(
                "DELETE FROM vault_items WHERE owner_id = ?1 AND id = ?2",
                params![owner.as_str(), item.id.to_string()],
            )
            .map_err(db_err)?;
            insert_row(&tx, item).map_err(db_err)?;
        }
        for id in &batch.removes {
            tx.execute(
                "DELETE FROM vault_items WHERE owner_id = ?1 AND id = ?2",
                params![owner.as_str(), id.to_string()],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)
    }

    async fn list_deleted(&self, owner: &OwnerId) -> Result<Vec<VaultItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM vault_items \
                 WHERE owner_id = ?1 AND is_deleted = 1 \
                 ORDER BY path",
                COLUMNS
            ))
            .map_err(db_err)?;

        let raws = stmt
            .query_map(params![owner.as_str()], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        collect_items(raws)
    }

    async fn deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<VaultItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM vault_items \
                 WHERE is_deleted = 1 AND deleted_at <= ?1 \
                   AND (?2 IS NULL OR owner_id > ?2 OR (owner_id = ?2 AND path > ?3)) \
                 ORDER BY owner_id, path \
                 LIMIT ?4",
                COLUMNS
            ))
            .map_err(db_err)?;

        let raws = stmt
            .query_map(
                params![
                    cutoff.timestamp_millis(),
                    after.map(|c| c.owner.clone()),
                    after.map(|c| c.path.clone()),
                    limit as i64,
                ],
                read_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        collect_items(raws)
    }

    async fn owner_usage(&self, owner: &OwnerId) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(size), 0) FROM vault_items \
                 WHERE owner_id = ?1 AND is_deleted = 0 AND kind = 'file'",
                params![owner.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(total as u64)
    }
}
