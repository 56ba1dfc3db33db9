//! Domain types
//!
//! Plain data shared by adapters, the traversal engine and the catalog.

pub mod entry;
pub mod errors;
pub mod paths;

pub use entry::{
    BackendKind, EntryKind, FileClass, IncrementalBatch, PathQueueItem, SyncFileEntry,
};
pub use errors::BackendError;
