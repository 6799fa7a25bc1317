//! Storage error types for cbam-storage.
//!
//! [`StorageError`] covers the failure modes of the storage layer: backend
//! errors, missing rows for each record type, structural rejections passed
//! through from cbam-core, and rows that cannot be decoded.

use thiserror::Error;

use cbam_core::error::CoreError;
use cbam_core::id::{EdgeId, ProcessId, ProductId};

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite backend reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A write was rejected by the data model (self-loop, wrong endpoint kinds).
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("process emission not found: process {0}")]
    ProcessNotFound(ProcessId),

    #[error("product emission not found: product {0}")]
    ProductNotFound(ProductId),

    /// A stored row could not be decoded.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
