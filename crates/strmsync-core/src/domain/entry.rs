//! Catalog entry types
//!
//! [`SyncFileEntry`] is what every adapter produces while listing a
//! directory, and what the catalog stores. [`PathQueueItem`] is the unit of
//! work for the traversal engine: one directory waiting to be expanded.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::paths;

// ============================================================================
// BackendKind
// ============================================================================

/// Which adapter produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pick-code cloud drive (115-style open API)
    Drive115,
    /// Path-addressed cloud drive (OpenList-style API)
    OpenList,
    /// Local filesystem
    Local,
}

impl BackendKind {
    /// Stable lowercase tag used in logs and references
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Drive115 => "115",
            BackendKind::OpenList => "openlist",
            BackendKind::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EntryKind / FileClass
// ============================================================================

/// Whether an entry is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// Classification flags computed by the file acceptance policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileClass {
    /// Video/audio content that gets a playable reference
    pub is_media: bool,
    /// Sidecar files (subtitles, posters, nfo) mirrored as-is
    pub is_metadata: bool,
}

// ============================================================================
// SyncFileEntry
// ============================================================================

/// A discovered file or directory
///
/// Created by an adapter during listing, enriched with a local mirror path
/// once its parent chain is known, and inserted into the catalog once.
/// After insertion only the `processed` flag changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFileEntry {
    /// Backend-native identifier (a path for path-addressed backends)
    pub id: String,
    /// Identifier of the containing directory
    pub parent_id: String,
    /// Remote path of the containing directory
    pub parent_path: String,
    /// Display name (last path segment)
    pub name: String,
    /// Backend resume token used to build playable references
    pub pick_code: Option<String>,
    /// File or directory
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time reported by the backend
    pub modified: DateTime<Utc>,
    /// Content hash, when the backend reports one
    pub hash: Option<String>,
    /// Adapter that produced the entry
    pub backend: BackendKind,
    /// Media classification (never set on directories)
    pub is_media: bool,
    /// Metadata classification (never set on directories)
    pub is_metadata: bool,
    /// Resolved path in the local mirror tree
    pub local_path: Option<PathBuf>,
    /// Set once downstream processing (emission) is done
    pub processed: bool,
}

impl SyncFileEntry {
    fn new(
        kind: EntryKind,
        backend: BackendKind,
        id: impl Into<String>,
        parent_id: impl Into<String>,
        parent_path: &str,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            parent_path: paths::normalize_remote_path(parent_path),
            name: name.into(),
            pick_code: None,
            kind,
            size: 0,
            modified: DateTime::<Utc>::default(),
            hash: None,
            backend,
            is_media: false,
            is_metadata: false,
            local_path: None,
            processed: false,
        }
    }

    /// Creates a file entry with zero size and epoch modification time
    pub fn file(
        backend: BackendKind,
        id: impl Into<String>,
        parent_id: impl Into<String>,
        parent_path: &str,
        name: impl Into<String>,
    ) -> Self {
        Self::new(EntryKind::File, backend, id, parent_id, parent_path, name)
    }

    /// Creates a directory entry
    pub fn directory(
        backend: BackendKind,
        id: impl Into<String>,
        parent_id: impl Into<String>,
        parent_path: &str,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            EntryKind::Directory,
            backend,
            id,
            parent_id,
            parent_path,
            name,
        )
    }

    pub fn with_size(mut self, size: u64) -> Self {
        if self.kind == EntryKind::File {
            self.size = size;
        }
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.hash = hash.filter(|h| !h.is_empty());
        self
    }

    pub fn with_pick_code(mut self, pick_code: Option<String>) -> Self {
        self.pick_code = pick_code.filter(|p| !p.is_empty());
        self
    }

    pub fn with_local_path(mut self, local_path: PathBuf) -> Self {
        self.local_path = Some(local_path);
        self
    }

    /// Applies classification flags. Directories are never classified.
    pub fn classify(&mut self, class: FileClass) {
        if self.kind == EntryKind::Directory {
            return;
        }
        self.is_media = class.is_media;
        self.is_metadata = class.is_metadata;
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Full remote path (`parent_path` + `name`)
    pub fn remote_path(&self) -> String {
        paths::join_remote(&self.parent_path, &self.name)
    }

    /// Lowercase extension including the leading dot, if any
    pub fn extension(&self) -> Option<String> {
        if self.is_dir() {
            return None;
        }
        let dot = self.name.rfind('.')?;
        if dot == 0 || dot + 1 == self.name.len() {
            return None;
        }
        Some(self.name[dot..].to_lowercase())
    }

    /// Builds the queue item that expands this directory
    pub fn to_queue_item(&self) -> PathQueueItem {
        PathQueueItem {
            path: self.remote_path(),
            id: self.id.clone(),
            modified: Some(self.modified),
        }
    }
}

// ============================================================================
// PathQueueItem
// ============================================================================

/// One directory waiting to be expanded by the traversal engine
///
/// Never mutated after creation; owned by the path queue until a worker
/// takes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathQueueItem {
    /// Remote path of the directory
    pub path: String,
    /// Backend-native identifier of the directory
    pub id: String,
    /// Last known modification time, when the lister reported one
    pub modified: Option<DateTime<Utc>>,
}

impl PathQueueItem {
    pub fn new(path: &str, id: impl Into<String>) -> Self {
        Self {
            path: paths::normalize_remote_path(path),
            id: id.into(),
            modified: None,
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Last path segment, used for exclusion checks
    pub fn leaf_name(&self) -> &str {
        paths::leaf_name(&self.path)
    }
}

// ============================================================================
// IncrementalBatch
// ============================================================================

/// One page of an incremental (modified-since) listing
#[derive(Debug, Clone, Default)]
pub struct IncrementalBatch {
    /// Entries modified after the cursor, newest first
    pub entries: Vec<SyncFileEntry>,
    /// Offset of the next page, if more entries may follow
    pub next_offset: Option<u64>,
    /// True once an entry at or before the cursor was seen
    pub reached_cursor: bool,
}

impl IncrementalBatch {
    /// Batch returned by backends without an incremental feed
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
