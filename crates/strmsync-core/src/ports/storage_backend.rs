//! Storage backend port
//!
//! One implementation per backend (cloud drive A, cloud drive B, local
//! filesystem). The traversal engine only talks to this trait, so the same
//! queue and worker logic drives every backend.
//!
//! ## Design Notes
//!
//! - Every operation exists on every backend. Operations a backend cannot
//!   support return an empty or zero result, never an error, so callers need
//!   no per-backend branches.
//! - Every call that may touch the network takes the run's
//!   [`CancellationToken`]; the local adapter checks it between entries.
//! - `ensure_directory_path` shares one algorithm across backends, see
//!   [`create_missing_directories`].

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{
    paths, BackendError, BackendKind, IncrementalBatch, PathQueueItem, SyncFileEntry,
};
use crate::ports::catalog::CatalogSink;

/// Capability contract for one storage backend
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which backend this adapter talks to
    fn kind(&self) -> BackendKind;

    /// Lists the immediate children of a directory, following pagination
    /// until the backend signals the end of the listing.
    ///
    /// Soft-deleted entries are skipped. A "frequency too high" response is
    /// retried on the same page after the adapter's local cooldown.
    async fn list_children(
        &self,
        parent_path: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncFileEntry>, BackendError>;

    /// Creates a single directory `name` under `parent_id`, returning its id.
    async fn create_directory(
        &self,
        parent_id: &str,
        parent_path: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;

    /// Creates every missing segment of `path`, returning the leaf id and the
    /// normalized remote path.
    async fn ensure_directory_path(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, String), BackendError>;

    /// Maps a remote path to its backend-native id.
    ///
    /// Fails with [`BackendError::NotFound`] when the path does not exist.
    async fn resolve_id(&self, path: &str, cancel: &CancellationToken)
        -> Result<String, BackendError>;

    /// Builds the playable reference written into an emitted file
    fn build_reference(&self, entry: &SyncFileEntry) -> String;

    /// Cheap total file count plus the id of the first root child.
    ///
    /// Backends without a count endpoint return `(0, None)`.
    async fn count_all(&self, cancel: &CancellationToken)
        -> Result<(u64, Option<String>), BackendError>;

    /// Lists every subdirectory below `parent_id` in bulk.
    ///
    /// Backends without a bulk directory listing return an empty list.
    async fn list_subdirectories(
        &self,
        parent_path: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathQueueItem>, BackendError>;

    /// One page of files under `parent_id` modified after `since`.
    ///
    /// Backends without an incremental feed return an empty batch.
    async fn list_files_since(
        &self,
        parent_id: &str,
        offset: u64,
        page_size: u32,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<IncrementalBatch, BackendError>;

    /// Deletes files under `parent_id`, best effort.
    ///
    /// A failure on one id is logged and does not stop the rest. Returns the
    /// ids that could not be deleted.
    async fn delete_files(
        &self,
        parent_id: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<String>;
}

// ============================================================================
// Shared ensure_directory_path algorithm
// ============================================================================

/// Creates the missing suffix of `path` on `backend`.
///
/// Walks from the leaf towards the root with `resolve_id` until an existing
/// segment is found, then creates each missing segment forward with
/// `create_directory`. Every directory created here is inserted into
/// `catalog` right away, so workers traversing sibling paths see it.
///
/// Returns `(leaf_id, normalized_path)`.
pub async fn create_missing_directories<B>(
    backend: &B,
    catalog: &dyn CatalogSink,
    path: &str,
    cancel: &CancellationToken,
) -> Result<(String, String), BackendError>
where
    B: StorageBackend + ?Sized,
{
    let target = paths::normalize_remote_path(path);
    let segments = paths::segments(&target);
    let prefix = |depth: usize| -> String {
        if depth == 0 {
            "/".to_string()
        } else {
            format!("/{}", segments[..depth].join("/"))
        }
    };

    let mut depth = segments.len();
    let mut parent_id = loop {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        match backend.resolve_id(&prefix(depth), cancel).await {
            Ok(id) => break id,
            Err(BackendError::NotFound(_)) if depth > 0 => depth -= 1,
            Err(err) => return Err(err),
        }
    };

    if depth == segments.len() {
        return Ok((parent_id, target));
    }

    debug!(
        backend = %backend.kind(),
        path = %target,
        existing = %prefix(depth),
        missing = segments.len() - depth,
        "Creating missing directories"
    );

    let mut parent_path = prefix(depth);
    for name in &segments[depth..] {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let id = backend
            .create_directory(&parent_id, &parent_path, name, cancel)
            .await?;
        let entry =
            SyncFileEntry::directory(backend.kind(), id.clone(), &parent_id, &parent_path, name)
                .with_modified(Utc::now());
        catalog.insert(entry)?;

        parent_path = paths::join_remote(&parent_path, name);
        parent_id = id;
    }

    Ok((parent_id, target))
}
