//! Local filesystem backend
//!
//! Implements [`StorageBackend`] over a directory tree using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Ids are remote paths**: a local tree has no stable object ids, so the
//!   normalized path relative to the root doubles as the id (like the
//!   path-addressed drive).
//! - **No rate limits**: requests never go through an executor and never
//!   touch a throttle gate.
//! - **Cancellation**: checked between directory entries.
//! - **References**: the absolute path of the file on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strmsync_core::domain::{
    paths, BackendError, BackendKind, IncrementalBatch, PathQueueItem, SyncFileEntry,
};
use strmsync_core::ports::{create_missing_directories, CatalogSink, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// `StorageBackend` rooted at a local directory
pub struct LocalBackend {
    root: PathBuf,
    catalog: Arc<dyn CatalogSink>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LocalBackend {
    /// Opens a backend rooted at `root`, which must be an existing directory.
    pub async fn open(
        root: impl AsRef<Path>,
        catalog: Arc<dyn CatalogSink>,
    ) -> Result<Self, BackendError> {
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(BackendError::NotFound(root.display().to_string()));
        }
        debug!(root = %root.display(), "Opened local backend");
        Ok(Self { root, catalog })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a remote path onto the filesystem under the root.
    fn local_path(&self, remote: &str) -> PathBuf {
        paths::mirror_path(&self.root, "/", remote)
    }
}

fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument(skip(self, _parent_id, cancel), fields(backend = "local"))]
    async fn list_children(
        &self,
        parent_path: &str,
        _parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncFileEntry>, BackendError> {
        let parent_path = paths::normalize_remote_path(parent_path);
        let dir = self.local_path(&parent_path);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BackendError::NotFound(parent_path))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(dir_entry) = reader.next_entry().await? {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }

            let name = dir_entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks; dangling links are skipped
            let metadata = match tokio::fs::metadata(dir_entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(name = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let id = paths::join_remote(&parent_path, &name);
            let entry = if metadata.is_dir() {
                SyncFileEntry::directory(BackendKind::Local, id, &parent_path, &parent_path, name)
            } else {
                SyncFileEntry::file(BackendKind::Local, id, &parent_path, &parent_path, name)
                    .with_size(metadata.len())
            };
            entries.push(entry.with_modified(modified_time(&metadata)));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn create_directory(
        &self,
        _parent_id: &str,
        parent_path: &str,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let path = paths::join_remote(parent_path, name);
        match tokio::fs::create_dir(self.local_path(&path)).await {
            Ok(()) => debug!(path = %path, "Created directory"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        Ok(path)
    }

    async fn ensure_directory_path(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, String), BackendError> {
        create_missing_directories(self, self.catalog.as_ref(), path, cancel).await
    }

    async fn resolve_id(
        &self,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let path = paths::normalize_remote_path(path);
        match tokio::fs::metadata(self.local_path(&path)).await {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn build_reference(&self, entry: &SyncFileEntry) -> String {
        self.local_path(&entry.remote_path()).display().to_string()
    }

    async fn count_all(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<(u64, Option<String>), BackendError> {
        Ok((0, None))
    }

    async fn list_subdirectories(
        &self,
        _parent_path: &str,
        _parent_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<PathQueueItem>, BackendError> {
        Ok(Vec::new())
    }

    async fn list_files_since(
        &self,
        _parent_id: &str,
        _offset: u64,
        _page_size: u32,
        _since: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<IncrementalBatch, BackendError> {
        Ok(IncrementalBatch::empty())
    }

    async fn delete_files(
        &self,
        _parent_id: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for id in ids {
            if cancel.is_cancelled() {
                failed.push(id.clone());
                continue;
            }
            match tokio::fs::remove_file(self.local_path(id)).await {
                Ok(()) => debug!(id = %id, "Deleted file"),
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to delete file");
                    failed.push(id.clone());
                }
            }
        }
        failed
    }
}
