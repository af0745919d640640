//! Vault engine for Coffer.
//!
//! This module provides:
//! - Item CRUD, listing, and subtree retrieval over the materialized-path index
//! - The soft-delete/trash, restore, and permanent-delete state machine
//! - Retention sweeping of expired trash on a resumable cursor
//! - Best-effort referential cleanup across dependent stores
//! - Append-only audit logging of every mutating operation
//!
//! # Architecture
//! The engine sits between the API layer and the storage backends. Every
//! subtree operation resolves its item set with a single ordered range query
//! and commits with a single batched write; structural mutations are guarded
//! by an optimistic version stamp on the subtree root.

pub mod audit;
pub mod cleanup;
pub mod config;
pub mod deletion;
pub mod retry;
pub mod store;
pub mod sweeper;

pub use audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditLog};
pub use cleanup::{CleanupFailure, CleanupReport, DependentStore, MemoryDependentStore, ReferentialCleanup};
pub use config::EngineConfig;
pub use deletion::{DeletionEngine, PurgeOutcome, SoftDeleteOutcome};
pub use retry::{retry_with_config, RetryConfig};
pub use store::{SubtreeStats, TrashedItem, VaultStore};
pub use sweeper::{RetentionSweeper, SweepHandle, SweepReport, SweepScheduler};
