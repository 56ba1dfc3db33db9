//! File acceptance policy port
//!
//! Size, extension and name filters are decided outside the traversal
//! engine; the engine only asks.

use crate::domain::{FileClass, SyncFileEntry};

/// Decides which discovered entries the traversal keeps
pub trait FileAcceptancePolicy: Send + Sync {
    /// Whether a file entry should be catalogued and emitted
    fn valid(&self, entry: &SyncFileEntry) -> bool;

    /// Whether a file or directory name matches an exclusion rule
    fn is_excluded_name(&self, name: &str) -> bool;

    /// Media/metadata classification for a file entry
    fn classify(&self, entry: &SyncFileEntry) -> FileClass;
}
