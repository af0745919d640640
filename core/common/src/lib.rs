//! Common utilities and types shared across Coffer modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BatchId, ItemId, MaterializedPath, OwnerId, PATH_SEPARATOR, RANGE_SENTINEL};
