//! Retention sweeping of expired trash.
//!
//! A sweep pass scans soft-deleted rows whose `deleted_at` is past the
//! retention window, in global `(owner, path)` order, and purges them
//! through the permanent-delete path. Path order puts ancestors before
//! descendants, so the pass selects only subtree roots and lets each purge
//! remove its descendants transitively. Work per run is capped and the
//! cursor is resumable, bounding execution time for large backlogs.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use coffer_common::{Error, MaterializedPath, OwnerId, Result};
use coffer_storage::{ItemStore, PageCursor};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::EngineConfig;
use crate::deletion::DeletionEngine;

/// Outcome of one sweep run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Expired trash rows examined.
    pub scanned: usize,
    /// Subtree roots purged.
    pub roots_purged: usize,
    /// Total rows removed across all purged subtrees.
    pub items_removed: usize,
    /// Roots skipped because their subtree was concurrently mutated.
    pub conflicts: usize,
    /// Whether the backlog was exhausted (cursor reset for the next run).
    pub finished: bool,
}

/// Background job purging trash past the retention window.
pub struct RetentionSweeper {
    items: Arc<dyn ItemStore>,
    deletion: Arc<DeletionEngine>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    /// Resume position in the `(owner, path)` ordering across runs.
    cursor: Mutex<Option<PageCursor>>,
}

impl RetentionSweeper {
    /// Create a sweeper over the given backends.
    pub fn new(
        items: Arc<dyn ItemStore>,
        deletion: Arc<DeletionEngine>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            items,
            deletion,
            audit,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// Run one capped sweep pass.
    ///
    /// Roots whose purge hits a version-stamp `Conflict` (subtree mid-move)
    /// are skipped, counted, and picked up by a later pass; any other
    /// backend failure aborts the run with the cursor unadvanced.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - self.config.retention_window();
        let mut cursor = self.cursor.lock().await;

        let rows = self
            .items
            .deleted_before(cutoff, cursor.as_ref(), self.config.sweep_batch_limit)
            .await?;

        let mut report = SweepReport {
            scanned: rows.len(),
            finished: rows.len() < self.config.sweep_batch_limit,
            ..Default::default()
        };

        // Path order guarantees a purged root precedes its descendants, so
        // one prefix check against the last selected root deduplicates.
        let mut last_root: Option<(OwnerId, MaterializedPath)> = None;
        for row in &rows {
            if let Some((owner, path)) = &last_root {
                if row.owner_id == *owner && row.path.is_descendant_of(path) {
                    continue;
                }
            }
            last_root = Some((row.owner_id.clone(), row.path.clone()));

            match self.deletion.permanent_delete(&row.owner_id, row.id).await {
                Ok(outcome) => {
                    report.roots_purged += 1;
                    report.items_removed += outcome.items_removed;
                }
                Err(Error::Conflict(_)) => {
                    debug!(owner = %row.owner_id, id = %row.id, "Sweep skipped busy subtree");
                    report.conflicts += 1;
                }
                // Row vanished between scan and purge (e.g. another sweeper).
                Err(Error::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        *cursor = if report.finished {
            None
        } else {
            rows.last().map(|row| PageCursor {
                owner: row.owner_id.to_string(),
                path: row.path.encoded().to_string(),
            })
        };

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                roots = report.roots_purged,
                items = report.items_removed,
                conflicts = report.conflicts,
                finished = report.finished,
                "Retention sweep pass complete"
            );
            self.audit.append(
                AuditEvent::new(OwnerId::system(), AuditAction::RetentionSweep, None)
                    .with_affected(report.items_removed)
                    .with_range_query(true)
                    .with_metadata(serde_json::json!({
                        "roots_purged": report.roots_purged,
                        "conflicts": report.conflicts,
                        "finished": report.finished,
                    })),
            );
        }
        Ok(report)
    }
}

/// Runs [`RetentionSweeper::run_once`] on the configured interval.
pub struct SweepScheduler;

impl SweepScheduler {
    /// Spawn the background sweep loop.
    pub fn spawn(sweeper: Arc<RetentionSweeper>) -> SweepHandle {
        let period = sweeper.config.sweep_interval;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Retention sweep scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweeper.run_once().await {
                            error!("Retention sweep failed: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            info!("Retention sweep scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });
        SweepHandle { stop: stop_tx, task }
    }
}

/// Handle for stopping the background sweep loop.
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
