//! Traversal engine
//!
//! The [`TraversalEngine`] walks a remote tree through any
//! [`StorageBackend`], writing every accepted entry into the catalog and
//! optionally streaming accepted files to a consumer.
//!
//! ## Traversal Flow
//!
//! 1. **Seed**: the root item is pushed onto the [`PathQueue`]. The root
//!    itself is never catalogued.
//! 2. **Expand**: N workers pop items, list their children (with retries),
//!    catalogue directories and push them back, filter and classify files.
//! 3. **Drain**: when the last pending item is finished the queue closes and
//!    the workers exit.
//!
//! ## Failure Handling
//!
//! Transient listing errors are retried up to `max_attempts` with a fixed
//! delay. The first fatal error cancels the run-scoped token, shuts the
//! queue down and is returned from [`TraversalEngine::run`]. Entries already
//! catalogued stay in the catalog.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use strmsync_core::config::SyncConfig;
use strmsync_core::domain::{paths, BackendError, PathQueueItem, SyncFileEntry};
use strmsync_core::ports::{CatalogSink, FileAcceptancePolicy, StorageBackend};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::path_queue::PathQueue;
use crate::SyncError;

// ============================================================================
// Configuration
// ============================================================================

/// Retry budget for listing one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt number `attempt` (1-based) may be repeated
    pub fn should_retry(&self, attempt: u32, err: &BackendError) -> bool {
        attempt < self.max_attempts && err.is_transient()
    }
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Root of the local mirror tree
    pub local_root: PathBuf,
}

impl TraversalConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                delay: Duration::from_millis(config.retry_delay_ms),
            },
            local_root: config.local_root.clone(),
        }
    }
}

// ============================================================================
// TraversalSummary
// ============================================================================

/// Totals of a completed traversal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalSummary {
    /// Directory entries newly catalogued
    pub directories: u64,
    /// File entries newly catalogued
    pub files: u64,
    /// Distinct files and directories skipped by name
    pub excluded: u64,
    /// Files refused by the acceptance policy
    pub rejected: u64,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    directories: AtomicU64,
    files: AtomicU64,
    excluded: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self, duration: Duration) -> TraversalSummary {
        TraversalSummary {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duration,
        }
    }
}

// ============================================================================
// Per-run state
// ============================================================================

/// Everything the workers of one run share
struct Traversal {
    backend: Arc<dyn StorageBackend>,
    catalog: Arc<dyn CatalogSink>,
    policy: Arc<dyn FileAcceptancePolicy>,
    retry: RetryPolicy,
    local_root: PathBuf,
    source_root: String,
    emitter: Option<mpsc::UnboundedSender<SyncFileEntry>>,
    queue: PathQueue,
    /// Child of the caller's token; cancelled on the first fatal error
    cancel: CancellationToken,
    counters: Counters,
    /// Excluded id -> remote path, so an id seen twice is counted once
    excluded: DashMap<String, String>,
    fatal: Mutex<Option<SyncError>>,
}

impl Traversal {
    fn exclude(&self, id: &str, path: String) {
        debug!(path = %path, "Skipping excluded entry");
        if self.excluded.insert(id.to_string(), path).is_none() {
            Counters::bump(&self.counters.excluded);
        }
    }

    /// Records the first fatal error and stops the run.
    fn fail(&self, err: SyncError) {
        if matches!(err, SyncError::Cancelled) && self.cancel.is_cancelled() {
            return;
        }

        {
            let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                error!(error = %err, "Traversal failed, stopping workers");
                *fatal = Some(err);
            } else {
                debug!(error = %err, "Additional error after traversal failure");
            }
        }
        self.cancel.cancel();
        self.queue.shutdown();
    }

    fn take_fatal(&self) -> Option<SyncError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn expand(&self, item: &PathQueueItem) -> Result<(), SyncError> {
        if self.policy.is_excluded_name(item.leaf_name()) {
            self.exclude(&item.id, item.path.clone());
            return Ok(());
        }

        let children = self.list_with_retry(item).await?;
        debug!(path = %item.path, children = children.len(), "Expanded directory");

        for child in children {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if child.is_dir() {
                self.accept_directory(child)?;
            } else {
                self.accept_file(child)?;
            }
        }
        Ok(())
    }

    async fn list_with_retry(&self, item: &PathQueueItem) -> Result<Vec<SyncFileEntry>, SyncError> {
        let mut attempt = 1u32;
        loop {
            match self
                .backend
                .list_children(&item.path, &item.id, &self.cancel)
                .await
            {
                Ok(children) => {
                    if attempt > 1 {
                        info!(path = %item.path, attempt, "Listing succeeded after retry");
                    }
                    return Ok(children);
                }
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    warn!(
                        path = %item.path,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        error = %err,
                        "Listing failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(SyncError::backend(&item.path, err)),
            }
        }
    }

    fn accept_directory(&self, entry: SyncFileEntry) -> Result<(), SyncError> {
        if self.policy.is_excluded_name(&entry.name) {
            self.exclude(&entry.id, entry.remote_path());
            return Ok(());
        }

        let local_path = self.mirror(&entry);
        let entry = entry.with_local_path(local_path);
        let item = entry.to_queue_item();
        if self.catalog.insert(entry)? {
            Counters::bump(&self.counters.directories);
        }
        if !self.queue.push(item) {
            debug!("Path queue closed, dropping discovered directory");
        }
        Ok(())
    }

    fn accept_file(&self, mut entry: SyncFileEntry) -> Result<(), SyncError> {
        if self.policy.is_excluded_name(&entry.name) {
            self.exclude(&entry.id, entry.remote_path());
            return Ok(());
        }
        if !self.policy.valid(&entry) {
            Counters::bump(&self.counters.rejected);
            return Ok(());
        }

        entry.classify(self.policy.classify(&entry));
        let local_path = self.mirror(&entry);
        let entry = entry.with_local_path(local_path);
        let emitted = self.emitter.as_ref().map(|_| entry.clone());

        if !self.catalog.insert(entry)? {
            return Ok(());
        }
        Counters::bump(&self.counters.files);

        if let (Some(emitter), Some(entry)) = (&self.emitter, emitted) {
            if emitter.send(entry).is_err() {
                debug!("File consumer dropped, entry not emitted");
            }
        }
        Ok(())
    }

    fn mirror(&self, entry: &SyncFileEntry) -> PathBuf {
        paths::mirror_path(&self.local_root, &self.source_root, &entry.remote_path())
    }
}

async fn worker_loop(worker_id: usize, run: Arc<Traversal>) {
    while let Some(item) = run.queue.pop(&run.cancel).await {
        if let Err(err) = run.expand(&item).await {
            run.fail(err);
        }
        if let Err(err) = run.queue.finish() {
            run.fail(err);
        }
    }
    debug!(worker_id, "Traversal worker exiting");
}

// ============================================================================
// TraversalEngine
// ============================================================================

/// Concurrent directory traversal over one storage backend
///
/// The engine itself is stateless between runs; every call to
/// [`run`](Self::run) gets a fresh queue and fresh counters.
pub struct TraversalEngine {
    backend: Arc<dyn StorageBackend>,
    catalog: Arc<dyn CatalogSink>,
    policy: Arc<dyn FileAcceptancePolicy>,
    config: TraversalConfig,
    emitter: Option<mpsc::UnboundedSender<SyncFileEntry>>,
}

impl TraversalEngine {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        catalog: Arc<dyn CatalogSink>,
        policy: Arc<dyn FileAcceptancePolicy>,
        config: TraversalConfig,
    ) -> Self {
        Self {
            backend,
            catalog,
            policy,
            config,
            emitter: None,
        }
    }

    /// Streams every newly catalogued file to `emitter`.
    pub fn with_emitter(mut self, emitter: mpsc::UnboundedSender<SyncFileEntry>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Resolves `path` on the backend and traverses it.
    pub async fn run_path(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<TraversalSummary, SyncError> {
        let id = self
            .backend
            .resolve_id(path, cancel)
            .await
            .map_err(|e| SyncError::backend(path, e))?;
        self.run(PathQueueItem::new(path, id), cancel).await
    }

    /// Traverses everything below `root`.
    ///
    /// Returns the first fatal error, or [`SyncError::Cancelled`] when
    /// `cancel` fired. The path queue is drained and closed in every case.
    #[tracing::instrument(skip(self, cancel), fields(backend = %self.backend.kind(), root = %root.path))]
    pub async fn run(
        &self,
        root: PathQueueItem,
        cancel: &CancellationToken,
    ) -> Result<TraversalSummary, SyncError> {
        let started = Instant::now();
        let workers = self.config.workers.max(1);
        let run = Arc::new(Traversal {
            backend: Arc::clone(&self.backend),
            catalog: Arc::clone(&self.catalog),
            policy: Arc::clone(&self.policy),
            retry: self.config.retry,
            local_root: self.config.local_root.clone(),
            source_root: root.path.clone(),
            emitter: self.emitter.clone(),
            queue: PathQueue::new(),
            cancel: cancel.child_token(),
            counters: Counters::default(),
            excluded: DashMap::new(),
            fatal: Mutex::new(None),
        });

        info!(workers, "Starting traversal");
        run.queue.push(root);

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(worker_loop(worker_id, Arc::clone(&run)));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                run.fail(SyncError::WorkerPanicked(e.to_string()));
            }
        }

        // Items left behind by a cancellation
        let discarded = run.queue.shutdown();

        if let Some(err) = run.take_fatal() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            info!(discarded, "Traversal cancelled");
            return Err(SyncError::Cancelled);
        }

        let pending = run.queue.pending();
        if pending != 0 {
            return Err(SyncError::QueueAccounting(format!(
                "{pending} items still pending after workers exited"
            )));
        }

        let summary = run.counters.summary(started.elapsed());
        info!(
            directories = summary.directories,
            files = summary.files,
            excluded = summary.excluded,
            rejected = summary.rejected,
            duration_ms = summary.duration.as_millis() as u64,
            "Traversal completed"
        );
        Ok(summary)
    }
}

// ============================================================================
// Tests
// ============================================================================
