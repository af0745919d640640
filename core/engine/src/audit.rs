//! Append-only audit log of mutating operations.
//!
//! Batched operations emit one summary event, not one per affected item,
//! bounding log volume. Events record whether the optimized range-query
//! subtree resolution was used, so a regression to per-level traversal
//! shows up in monitoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use coffer_common::{ItemId, OwnerId};

/// The mutating action an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    ItemCreated,
    ItemRenamed,
    ItemMoved,
    SoftDeleted,
    Restored,
    PermanentlyDeleted,
    RetentionSweep,
    BlobDeleteFailed,
    DependencyCleanupFailed,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Who performed the action ([`OwnerId::system`] for background jobs).
    pub actor: OwnerId,
    /// What happened.
    pub action: AuditAction,
    /// Target item, when the action has a single root (batch summaries may
    /// omit it).
    pub item_id: Option<ItemId>,
    /// Number of items affected (1 for single-item actions).
    pub affected: usize,
    /// Whether subtree resolution used the single ordered range query.
    pub range_query_used: bool,
    /// Action-specific details.
    pub metadata: serde_json::Value,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create a new event for a single-item action.
    pub fn new(actor: OwnerId, action: AuditAction, item_id: Option<ItemId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            action,
            item_id,
            affected: 1,
            range_query_used: false,
            metadata: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    /// Set the affected-item count (batch summary).
    pub fn with_affected(mut self, affected: usize) -> Self {
        self.affected = affected;
        self
    }

    /// Flag that subtree resolution used the range-query path.
    pub fn with_range_query(mut self, used: bool) -> Self {
        self.range_query_used = used;
        self
    }

    /// Attach action-specific metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Sink for audit events.
///
/// Appends must never fail the operation being audited; implementations
/// swallow their own errors and log them.
pub trait AuditSink: Send + Sync {
    /// Append one event.
    fn append(&self, event: AuditEvent);
}

/// In-memory audit log with query helpers, for tests and embedding.
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    /// Create a new empty log.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all events in append order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().unwrap().clone()
    }

    /// Events whose target is the given item.
    pub fn events_for_item(&self, id: ItemId) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.item_id == Some(id))
            .cloned()
            .collect()
    }

    /// Events with the given action.
    pub fn events_for_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Failure events eligible for out-of-band reconciliation.
    pub fn failures(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| {
                matches!(
                    e.action,
                    AuditAction::BlobDeleteFailed | AuditAction::DependencyCleanupFailed
                )
            })
            .cloned()
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, event: AuditEvent) {
        self.events.write().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_query() {
        let log = MemoryAuditLog::new();
        let owner = OwnerId::new("owner-1").unwrap();
        let item = ItemId::generate();

        log.append(AuditEvent::new(
            owner.clone(),
            AuditAction::ItemCreated,
            Some(item),
        ));
        log.append(
            AuditEvent::new(owner.clone(), AuditAction::SoftDeleted, Some(item))
                .with_affected(3)
                .with_range_query(true),
        );
        log.append(AuditEvent::new(owner, AuditAction::BlobDeleteFailed, Some(item)));

        assert_eq!(log.len(), 3);
        assert_eq!(log.events_for_item(item).len(), 3);
        assert_eq!(log.events_for_action(AuditAction::SoftDeleted).len(), 1);
        assert_eq!(log.failures().len(), 1);

        let summary = &log.events_for_action(AuditAction::SoftDeleted)[0];
        assert_eq!(summary.affected, 3);
        assert!(summary.range_query_used);
    }
}
