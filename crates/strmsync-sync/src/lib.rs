//! strmsync Sync - Concurrent traversal engine
//!
//! Provides:
//! - A growing path queue with pending-count based termination
//! - A worker-pool traversal engine that walks any `StorageBackend`
//! - An in-memory, idempotent catalog
//! - A local filesystem backend
//!
//! ## Modules
//!
//! - [`path_queue`] - FIFO of directories waiting to be expanded
//! - [`engine`] - Traversal engine orchestrating the workers
//! - [`catalog`] - `DashMap`-backed `CatalogSink`
//! - [`filesystem`] - `StorageBackend` over `tokio::fs`

pub mod catalog;
pub mod engine;
pub mod filesystem;
pub mod path_queue;

use strmsync_core::domain::BackendError;
use strmsync_core::ports::CatalogError;
use thiserror::Error;

/// Errors that end a traversal
#[derive(Debug, Error)]
pub enum SyncError {
    /// Listing a directory failed after the retry budget
    #[error("Listing {path} failed: {source}")]
    Backend {
        path: String,
        #[source]
        source: BackendError,
    },

    /// The catalog refused an entry
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The caller's cancellation token fired
    #[error("Traversal cancelled")]
    Cancelled,

    /// `finish` was called more often than `push`
    #[error("Path queue accounting error: {0}")]
    QueueAccounting(String),

    /// A worker task panicked or was aborted
    #[error("Traversal worker failed: {0}")]
    WorkerPanicked(String),
}

impl SyncError {
    /// Wraps a backend failure for the directory being expanded.
    pub fn backend(path: impl Into<String>, source: BackendError) -> Self {
        match source {
            BackendError::Cancelled => SyncError::Cancelled,
            source => SyncError::Backend {
                path: path.into(),
                source,
            },
        }
    }
}
