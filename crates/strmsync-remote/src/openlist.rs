//! OpenListBackend - `StorageBackend` for the path-addressed cloud drive
//!
//! Every entry is addressed by its full path, so ids are normalized remote
//! paths. The API has no bulk directory listing, no count endpoint and no
//! modification-time feed; those operations return empty results.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::{Method, Request, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use strmsync_core::config::Config;
use strmsync_core::domain::{
    paths, BackendError, BackendKind, IncrementalBatch, PathQueueItem, SyncFileEntry,
};
use strmsync_core::ports::{create_missing_directories, CatalogSink, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{RequestExecutor, RequestOptions, RequestResult};

const LIST_PATH: &str = "/api/fs/list";
const GET_PATH: &str = "/api/fs/get";
const MKDIR_PATH: &str = "/api/fs/mkdir";
const REMOVE_PATH: &str = "/api/fs/remove";

// ============================================================================
// API request / response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    path: &'a str,
    password: &'a str,
    page: u32,
    per_page: u32,
    refresh: bool,
}

/// Payload of `/api/fs/list`
#[derive(Debug, Deserialize)]
struct ListPayload {
    /// `null` for an empty directory
    #[serde(default)]
    content: Option<Vec<RawObject>>,
    #[serde(default)]
    total: u64,
}

/// One object in a listing
#[derive(Debug, Deserialize)]
struct RawObject {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_dir: bool,
    /// RFC 3339 timestamp
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    /// Download signature, empty when signing is disabled
    #[serde(default)]
    sign: Option<String>,
}

impl RawObject {
    fn into_entry(self, parent_path: &str) -> SyncFileEntry {
        let id = paths::join_remote(parent_path, &self.name);
        let modified = self.modified.unwrap_or_default();
        if self.is_dir {
            SyncFileEntry::directory(BackendKind::OpenList, id, parent_path, parent_path, self.name)
                .with_modified(modified)
        } else {
            SyncFileEntry::file(BackendKind::OpenList, id, parent_path, parent_path, self.name)
                .with_size(self.size)
                .with_modified(modified)
                .with_pick_code(self.sign)
        }
    }
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    dir: &'a str,
    names: [&'a str; 1],
}

// ============================================================================
// Settings
// ============================================================================

/// Connection and paging settings
#[derive(Debug, Clone)]
pub struct OpenListSettings {
    pub base_url: String,
    pub token: String,
    pub page_size: u32,
    pub frequency_backoff: Duration,
    pub request_timeout: Duration,
}

impl OpenListSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.openlist.base_url.clone(),
            token: config.openlist.token.clone().unwrap_or_default(),
            page_size: config.openlist.page_size.max(1),
            frequency_backoff: Duration::from_secs(config.rate_limiting.frequency_backoff_secs),
            request_timeout: Duration::from_secs(config.rate_limiting.request_timeout_secs),
        }
    }
}

// ============================================================================
// OpenListBackend
// ============================================================================

/// Path-addressed cloud drive adapter
pub struct OpenListBackend {
    executor: Arc<RequestExecutor>,
    settings: OpenListSettings,
    token: RwLock<String>,
    catalog: Arc<dyn CatalogSink>,
    /// Directories known to exist
    known_dirs: DashMap<String, ()>,
}

impl OpenListBackend {
    pub fn new(
        executor: Arc<RequestExecutor>,
        settings: OpenListSettings,
        catalog: Arc<dyn CatalogSink>,
    ) -> Self {
        let known_dirs = DashMap::new();
        known_dirs.insert("/".to_string(), ());
        Self {
            executor,
            token: RwLock::new(settings.token.clone()),
            settings,
            catalog,
            known_dirs,
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.into();
        debug!("Updated API token");
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);
        let token = self.token.read().unwrap_or_else(PoisonError::into_inner).clone();
        self.executor
            .http_client()
            .request(Method::POST, url)
            .header(reqwest::header::AUTHORIZATION, token)
            .timeout(self.settings.request_timeout)
    }

    async fn send<F>(&self, build: F, cancel: &CancellationToken) -> Result<RequestResult, BackendError>
    where
        F: Fn() -> Result<Request, reqwest::Error>,
    {
        self.executor
            .execute_with_backoff(
                build,
                RequestOptions::default(),
                self.settings.frequency_backoff,
                cancel,
            )
            .await
            .map_err(BackendError::from)
    }
}

/// The API reports missing objects as a generic error with this message
fn is_not_found(code: i64, message: &str) -> bool {
    code == 404 || message.to_lowercase().contains("not found")
}

/// Turns a "not found" API error for `path` into [`BackendError::NotFound`].
fn map_not_found(err: BackendError, path: &str) -> BackendError {
    match err {
        BackendError::Api { code, message } if is_not_found(code, &message) => {
            BackendError::NotFound(path.to_string())
        }
        other => other,
    }
}

#[async_trait::async_trait]
impl StorageBackend for OpenListBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenList
    }

    #[tracing::instrument(skip(self, _parent_id, cancel), fields(backend = "openlist"))]
    async fn list_children(
        &self,
        parent_path: &str,
        _parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncFileEntry>, BackendError> {
        let parent_path = paths::normalize_remote_path(parent_path);
        let per_page = self.settings.page_size;
        let mut entries = Vec::new();
        let mut page = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let result = self
                .send(
                    || {
                        self.request(LIST_PATH)
                            .json(&ListRequest {
                                path: &parent_path,
                                password: "",
                                page,
                                per_page,
                                refresh: false,
                            })
                            .build()
                    },
                    cancel,
                )
                .await
                .map_err(|e| map_not_found(e, &parent_path))?;
            let payload: ListPayload = result.envelope.data_as()?;
            let objects = payload.content.unwrap_or_default();
            let received = objects.len();
            debug!(page, received, total = payload.total, "Listed page");

            for object in objects {
                let entry = object.into_entry(&parent_path);
                if entry.is_dir() {
                    self.known_dirs.insert(entry.id.clone(), ());
                }
                entries.push(entry);
            }

            if received < per_page as usize {
                break;
            }
            page += 1;
        }

        Ok(entries)
    }

    async fn create_directory(
        &self,
        _parent_id: &str,
        parent_path: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let path = paths::join_remote(parent_path, name);
        self.send(
            || self.request(MKDIR_PATH).json(&PathRequest { path: &path }).build(),
            cancel,
        )
        .await?;

        info!(path = %path, "Created directory");
        self.known_dirs.insert(path.clone(), ());
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
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let path = paths::normalize_remote_path(path);
        if self.known_dirs.contains_key(&path) {
            return Ok(path);
        }

        let result = self
            .send(
                || self.request(GET_PATH).json(&PathRequest { path: &path }).build(),
                cancel,
            )
            .await;
        match result {
            Ok(_) => {
                self.known_dirs.insert(path.clone(), ());
                Ok(path)
            }
            Err(e) => Err(map_not_found(e, &path)),
        }
    }

    fn build_reference(&self, entry: &SyncFileEntry) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let remote = entry.remote_path();
        let mut reference = match Url::parse(base) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop_if_empty().push("d");
                    segments.extend(remote.split('/').filter(|s| !s.is_empty()));
                }
                url.to_string()
            }
            Err(_) => format!("{base}/d{remote}"),
        };
        if let Some(sign) = entry.pick_code.as_deref().filter(|s| !s.is_empty()) {
            reference.push_str("?sign=");
            reference.push_str(sign);
        }
        reference
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
        parent_id: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let dir = paths::normalize_remote_path(parent_id);
        let mut failed = Vec::new();
        for id in ids {
            let name = paths::leaf_name(id);
            let result = self
                .send(
                    || {
                        self.request(REMOVE_PATH)
                            .json(&RemoveRequest {
                                dir: &dir,
                                names: [name],
                            })
                            .build()
                    },
                    cancel,
                )
                .await;
            match result {
                Ok(_) => debug!(id = %id, "Deleted file"),
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to delete file");
                    failed.push(id.clone());
                }
            }
        }
        failed
    }
}
