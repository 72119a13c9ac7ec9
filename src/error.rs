// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Error types for HypercubeDB operations.
//!
//! This module provides:
//! - [`HyperError`] - The error enum returned by every catalog operation
//! - [`Result<T>`] - A type alias for `std::result::Result<T, HyperError>`

/// Result type alias for HypercubeDB operations.
///
/// This is equivalent to `std::result::Result<T, HyperError>`.
pub type Result<T> = std::result::Result<T, HyperError>;

/// Error taxonomy for catalog, storage and snapshot operations.
///
/// # Examples
///
/// ```rust
/// use hypercubedb::{Catalog, CatalogConfig, HyperError};
///
/// let dir = tempfile::tempdir().unwrap();
/// let catalog = Catalog::open(CatalogConfig::in_dir(dir.path())).unwrap();
///
/// // No database has been selected yet
/// match catalog.create_table("items", &["id"], "id") {
///     Err(HyperError::Validation(msg)) => println!("rejected: {}", msg),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum HyperError {
    /// Invalid input: missing database context, missing partition key,
    /// malformed predicate or bad arguments.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown database, table, dimension, index or extension.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The named database, table or index already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The table lock is held by another in-flight operation.
    ///
    /// Callers decide whether and when to retry.
    #[error("Table is locked: {0}")]
    Busy(String),

    /// I/O error while reading or writing a snapshot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Canonical predicate encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// LZ4 decompression of a snapshot frame failed.
    #[error("Decompression failed")]
    DecompressionFailed,

    /// Malformed command arguments handed to an extension.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl HyperError {
    /// Returns `true` for [`HyperError::Busy`].
    pub fn is_busy(&self) -> bool {
        matches!(self, HyperError::Busy(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        HyperError::Validation(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        HyperError::NotFound(msg.into())
    }
}
