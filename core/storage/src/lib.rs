//! Storage backends for Coffer.
//!
//! This module provides the two persistence seams the engine is built on:
//! a key-addressed blob store for encrypted file content, and an
//! ordered-by-path item index over vault metadata. Both are trait-based so
//! backends can be swapped without touching engine logic.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the engine crate
//! - Async operations: all I/O operations are async
//! - One batched write per subtree operation, optionally version-guarded
//! - Unified error semantics: consistent error types across backends

pub mod blob;
pub mod item;
pub mod local;
pub mod memory;
pub mod registry;
pub mod sqlite;

pub use blob::BlobStore;
pub use item::{ItemKind, ItemStore, PageCursor, VaultItem, VersionGuard, WriteBatch};
pub use local::LocalBlobStore;
pub use memory::{MemoryBlobStore, MemoryItemStore};
pub use registry::{create_default_registry, BlobStoreFactory, BlobStoreRegistry};
pub use sqlite::SqliteItemStore;
