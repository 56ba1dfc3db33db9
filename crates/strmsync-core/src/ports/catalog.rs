//! Catalog port
//!
//! The catalog is the single mutation target of a traversal: every worker
//! and every adapter that creates directories writes into it concurrently.
//! Implementations must serialize per identifier so that inserting the same
//! entry twice keeps exactly one logical record.

use thiserror::Error;

use crate::domain::SyncFileEntry;

/// Errors raised by catalog implementations
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The entry carries an empty identifier
    #[error("Entry has no identifier: {0}")]
    MissingId(String),

    /// `mark_processed` was called for an id that was never inserted
    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    /// The backing store refused the entry
    #[error("Catalog rejected entry: {0}")]
    Rejected(String),
}

/// Concurrency-safe, idempotent entry store
pub trait CatalogSink: Send + Sync {
    /// Inserts an entry keyed by its id.
    ///
    /// Returns `Ok(true)` when the entry was new and `Ok(false)` when an
    /// entry with the same id already existed (the stored one is kept).
    fn insert(&self, entry: SyncFileEntry) -> Result<bool, CatalogError>;

    /// Whether an entry with this id has been inserted
    fn contains(&self, id: &str) -> bool;

    /// Sets the processed flag on a stored entry
    fn mark_processed(&self, id: &str) -> Result<(), CatalogError>;
}

/// Shared validation for implementations
pub fn validate_entry(entry: &SyncFileEntry) -> Result<(), CatalogError> {
    if entry.id.trim().is_empty() {
        return Err(CatalogError::MissingId(entry.remote_path()));
    }
    Ok(())
}
