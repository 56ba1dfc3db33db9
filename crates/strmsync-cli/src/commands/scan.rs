//! Scan command - Traverse a backend into an in-memory catalog
//!
//! Provides the `strmsync scan` CLI command which:
//! 1. Opens the selected backend (local directory or one of the cloud drives)
//! 2. Runs the TraversalEngine with the configured acceptance policy
//! 3. Optionally prints the reference of every accepted file as it is found
//! 4. Prints a summary of the run
//!
//! Ctrl-C cancels the run; entries catalogued so far are reported.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use strmsync_core::config::Config;
use strmsync_core::domain::{BackendKind, SyncFileEntry};
use strmsync_core::policy::ExtensionPolicy;
use strmsync_core::ports::StorageBackend;
use strmsync_remote::drive115::{Drive115Backend, Drive115Settings};
use strmsync_remote::envelope::CodeTable;
use strmsync_remote::executor::{ExecutorConfig, RequestExecutor};
use strmsync_remote::openlist::{OpenListBackend, OpenListSettings};
use strmsync_sync::catalog::MemoryCatalog;
use strmsync_sync::engine::{TraversalConfig, TraversalEngine, TraversalSummary};
use strmsync_sync::filesystem::LocalBackend;
use strmsync_sync::SyncError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::output::{OutputFormat, OutputFormatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Local directory tree
    Local,
    /// Pick-code cloud drive (115 open API)
    Drive115,
    /// Path-addressed cloud drive (OpenList API)
    Openlist,
}

#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Directory to traverse: a local directory, or a remote path for cloud backends
    #[arg(long)]
    pub source: String,

    /// Root of the local mirror tree [default: sync.local_root]
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Number of traversal workers [default: sync.workers]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Backend to traverse
    #[arg(long, value_enum, default_value_t = BackendChoice::Local)]
    pub backend: BackendChoice,

    /// Print the reference of every accepted file
    #[arg(long)]
    pub list: bool,
}

/// An opened backend plus the executor that must be shut down after the run
struct OpenedBackend {
    backend: Arc<dyn StorageBackend>,
    executor: Option<Arc<RequestExecutor>>,
    root: String,
}

impl ScanCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = format.formatter();

        let mut sync = config.sync.clone();
        if let Some(target) = &self.target {
            sync.local_root = target.clone();
        }
        if let Some(workers) = self.workers {
            sync.workers = workers;
        }

        let catalog = Arc::new(MemoryCatalog::new());
        let opened = self.open_backend(config, catalog.clone()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = TraversalEngine::new(
            Arc::clone(&opened.backend),
            catalog.clone(),
            Arc::new(ExtensionPolicy::from_config(&sync)),
            TraversalConfig::from_sync_config(&sync),
        )
        .with_emitter(tx);

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling scan");
                interrupt.cancel();
            }
        });

        let printer = tokio::spawn(collect_references(
            rx,
            Arc::clone(&opened.backend),
            self.list,
            format,
        ));

        info!(
            backend = ?self.backend,
            source = %self.source,
            local_root = %sync.local_root.display(),
            workers = sync.workers,
            "Starting scan"
        );
        let result = engine.run_path(&opened.root, &cancel).await;
        // Closes the emitter so the printer finishes
        drop(engine);
        let references = printer.await.unwrap_or_default();

        let requests = match &opened.executor {
            Some(executor) => {
                let stats = executor.stats();
                executor.shutdown().await;
                Some(stats)
            }
            None => None,
        };

        match result {
            Ok(summary) => {
                let media = catalog.files().iter().filter(|e| e.is_media).count();
                if format.is_json() {
                    let mut json = summary_json(&summary, media, catalog.len());
                    json["requests"] = serde_json::to_value(&requests)?;
                    if self.list {
                        json["references"] = serde_json::to_value(&references)?;
                    }
                    formatter.print_json(&json);
                } else {
                    print_summary(formatter.as_ref(), &summary, media, catalog.len());
                }
                Ok(())
            }
            Err(SyncError::Cancelled) => {
                formatter.warn(&format!(
                    "Scan cancelled, {} entries catalogued before the interrupt",
                    catalog.len()
                ));
                Ok(())
            }
            Err(err) => Err(err).context("Scan failed"),
        }
    }

    async fn open_backend(&self, config: &Config, catalog: Arc<MemoryCatalog>) -> Result<OpenedBackend> {
        match self.backend {
            BackendChoice::Local => {
                let backend = LocalBackend::open(&self.source, catalog)
                    .await
                    .with_context(|| format!("Cannot open source directory {}", self.source))?;
                Ok(OpenedBackend {
                    backend: Arc::new(backend),
                    executor: None,
                    root: "/".to_string(),
                })
            }
            BackendChoice::Drive115 => {
                if config.drive115.access_token.is_none() {
                    anyhow::bail!("drive115.access_token is not configured");
                }
                let executor = RequestExecutor::builder(
                    BackendKind::Drive115,
                    ExecutorConfig::from(&config.rate_limiting),
                )
                .codes(CodeTable::drive115())
                .start();
                let backend = Drive115Backend::new(
                    Arc::clone(&executor),
                    Drive115Settings::from_config(config),
                    catalog,
                );
                Ok(OpenedBackend {
                    backend: Arc::new(backend),
                    executor: Some(executor),
                    root: self.source.clone(),
                })
            }
            BackendChoice::Openlist => {
                let executor = RequestExecutor::builder(
                    BackendKind::OpenList,
                    ExecutorConfig::from(&config.rate_limiting),
                )
                .codes(CodeTable::openlist())
                .start();
                let backend = OpenListBackend::new(
                    Arc::clone(&executor),
                    OpenListSettings::from_config(config),
                    catalog,
                );
                Ok(OpenedBackend {
                    backend: Arc::new(backend),
                    executor: Some(executor),
                    root: self.source.clone(),
                })
            }
        }
    }
}

/// Drains emitted files, printing (human) or collecting (JSON) references.
async fn collect_references(
    mut rx: mpsc::UnboundedReceiver<SyncFileEntry>,
    backend: Arc<dyn StorageBackend>,
    list: bool,
    format: OutputFormat,
) -> Vec<serde_json::Value> {
    let mut collected = Vec::new();
    while let Some(entry) = rx.recv().await {
        if !list {
            continue;
        }
        let reference = backend.build_reference(&entry);
        if format.is_json() {
            collected.push(serde_json::json!({
                "path": entry.remote_path(),
                "reference": reference,
            }));
        } else {
            println!("{} -> {reference}", entry.remote_path());
        }
    }
    collected
}

fn summary_json(summary: &TraversalSummary, media: usize, catalogued: usize) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "directories": summary.directories,
        "files": summary.files,
        "media": media,
        "excluded": summary.excluded,
        "rejected": summary.rejected,
        "catalogued": catalogued,
        "duration_ms": summary.duration.as_millis() as u64,
    })
}

fn print_summary(
    formatter: &dyn OutputFormatter,
    summary: &TraversalSummary,
    media: usize,
    catalogued: usize,
) {
    formatter.success("Scan completed");
    formatter.field("Directories", &summary.directories);
    formatter.field("Files", &format!("{} ({media} media)", summary.files));
    formatter.field("Excluded", &summary.excluded);
    formatter.field("Rejected", &summary.rejected);
    formatter.field("Catalogued", &catalogued);
    formatter.field("Duration", &format!("{:.2}s", summary.duration.as_secs_f64()));
}
