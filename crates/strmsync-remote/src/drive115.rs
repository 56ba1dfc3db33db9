//! Drive115Backend - `StorageBackend` for the pick-code cloud drive
//!
//! Talks to the drive's open API through a shared [`RequestExecutor`].
//! Directories are addressed by numeric ids (`0` is the root); files carry a
//! pick code that playback references are built from.
//!
//! ## Design Notes
//!
//! - Known `path -> id` and `id -> path` pairs are cached in `DashMap`s and
//!   filled by every listing, so path resolution rarely needs the network.
//! - Entries whose `aid` is not `1` are in the recycle bin and are skipped.
//! - A "frequency too high" response sleeps `frequency_backoff` and resends
//!   the same page (see [`RequestExecutor::execute_with_backoff`]).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use reqwest::{Method, Request, RequestBuilder};
use serde::{Deserialize, Deserializer};
use strmsync_core::config::{Config, DRIVE115_MAX_PAGE_SIZE};
use strmsync_core::domain::{
    paths, BackendError, BackendKind, IncrementalBatch, PathQueueItem, SyncFileEntry,
};
use strmsync_core::ports::{create_missing_directories, CatalogSink, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{RequestExecutor, RequestOptions, RequestResult};

/// Identifier of the drive root
pub const ROOT_ID: &str = "0";

const FILES_PATH: &str = "/open/ufile/files";
const FOLDER_INFO_PATH: &str = "/open/folder/get_info";
const FOLDER_ADD_PATH: &str = "/open/folder/add";
const DELETE_PATH: &str = "/open/ufile/delete";

// ============================================================================
// Open API response types
// ============================================================================

/// Accepts a JSON string or number as a `String`
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Accepts a JSON number or numeric string as a `u64`
fn lenient_u64<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or_default(),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

/// Response of `GET /open/ufile/files`
#[derive(Debug, Deserialize)]
struct FilesResponse {
    /// Entries on this page
    #[serde(default)]
    data: Vec<RawFile>,
    /// Total entries matching the query
    #[serde(default, deserialize_with = "lenient_u64")]
    count: u64,
}

/// One entry of a file listing
#[derive(Debug, Deserialize)]
struct RawFile {
    /// File or folder id
    #[serde(deserialize_with = "lenient_string")]
    fid: String,
    /// Parent folder id
    #[serde(default, deserialize_with = "lenient_string")]
    pid: String,
    /// `"0"` for folders, `"1"` for files
    #[serde(default, deserialize_with = "lenient_string")]
    fc: String,
    /// Display name
    #[serde(rename = "fn", default)]
    name: String,
    /// Pick code
    #[serde(default)]
    pc: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
    /// Size in bytes
    #[serde(default, deserialize_with = "lenient_u64")]
    fs: u64,
    /// Last update, unix seconds
    #[serde(default, deserialize_with = "lenient_u64")]
    upt: u64,
    /// `"1"` when live, anything else when in the recycle bin
    #[serde(default = "live_aid", deserialize_with = "lenient_string")]
    aid: String,
}

fn live_aid() -> String {
    "1".to_string()
}

impl RawFile {
    fn is_folder(&self) -> bool {
        self.fc == "0"
    }

    fn is_deleted(&self) -> bool {
        self.aid != "1"
    }

    fn modified(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.upt as i64, 0)
            .single()
            .unwrap_or_default()
    }

    fn into_entry(self, parent_id: &str, parent_path: &str) -> SyncFileEntry {
        let modified = self.modified();
        let parent_id = if self.pid.is_empty() {
            parent_id.to_string()
        } else {
            self.pid
        };
        if self.fc == "0" {
            SyncFileEntry::directory(BackendKind::Drive115, self.fid, parent_id, parent_path, self.name)
                .with_modified(modified)
                .with_pick_code(self.pc)
        } else {
            SyncFileEntry::file(BackendKind::Drive115, self.fid, parent_id, parent_path, self.name)
                .with_size(self.fs)
                .with_modified(modified)
                .with_hash(self.sha1)
                .with_pick_code(self.pc)
        }
    }
}

/// Payload of `/open/folder/get_info`
#[derive(Debug, Deserialize)]
struct FolderInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    file_id: String,
}

/// Payload of `/open/folder/add`
#[derive(Debug, Deserialize)]
struct FolderAdded {
    #[serde(deserialize_with = "lenient_string")]
    file_id: String,
}

// ============================================================================
// Settings
// ============================================================================

/// Connection and paging settings
#[derive(Debug, Clone)]
pub struct Drive115Settings {
    pub base_url: String,
    pub access_token: String,
    pub page_size: u32,
    pub strm_base_url: String,
    pub user_id: String,
    pub frequency_backoff: Duration,
    pub request_timeout: Duration,
}

impl Drive115Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.drive115.base_url.clone(),
            access_token: config.drive115.access_token.clone().unwrap_or_default(),
            page_size: config.drive115.page_size.clamp(1, DRIVE115_MAX_PAGE_SIZE),
            strm_base_url: config.drive115.strm_base_url.clone(),
            user_id: config.drive115.user_id.clone(),
            frequency_backoff: Duration::from_secs(config.rate_limiting.frequency_backoff_secs),
            request_timeout: Duration::from_secs(config.rate_limiting.request_timeout_secs),
        }
    }
}

// ============================================================================
// Drive115Backend
// ============================================================================

/// Pick-code cloud drive adapter
pub struct Drive115Backend {
    executor: Arc<RequestExecutor>,
    settings: Drive115Settings,
    /// Current access token, replaced after an external refresh
    access_token: RwLock<String>,
    catalog: Arc<dyn CatalogSink>,
    /// Known directory path -> id
    dir_ids: DashMap<String, String>,
    /// Known directory id -> path
    dir_paths: DashMap<String, String>,
}

impl Drive115Backend {
    pub fn new(
        executor: Arc<RequestExecutor>,
        settings: Drive115Settings,
        catalog: Arc<dyn CatalogSink>,
    ) -> Self {
        let backend = Self {
            executor,
            access_token: RwLock::new(settings.access_token.clone()),
            settings,
            catalog,
            dir_ids: DashMap::new(),
            dir_paths: DashMap::new(),
        };
        backend.remember_dir("/", ROOT_ID);
        backend
    }

    /// Replaces the access token (e.g., after a credential refresh).
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = token.into();
        debug!("Updated drive access token");
    }

    /// Cached id for a directory path, if known
    pub fn cached_id(&self, path: &str) -> Option<String> {
        self.dir_ids
            .get(&paths::normalize_remote_path(path))
            .map(|id| id.clone())
    }

    fn remember_dir(&self, path: &str, id: &str) {
        let path = paths::normalize_remote_path(path);
        self.dir_ids.insert(path.clone(), id.to_string());
        self.dir_paths.insert(id.to_string(), path);
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);
        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.executor
            .http_client()
            .request(method, url)
            .bearer_auth(token)
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

    /// One page of `/open/ufile/files` with the given extra query pairs.
    async fn files_page(
        &self,
        cid: &str,
        offset: u64,
        limit: u32,
        extra: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<FilesResponse, BackendError> {
        let offset = offset.to_string();
        let limit = limit.to_string();
        let result = self
            .send(
                || {
                    self.request(Method::GET, FILES_PATH)
                        .query(&[("cid", cid), ("offset", offset.as_str()), ("limit", limit.as_str())])
                        .query(extra)
                        .build()
                },
                cancel,
            )
            .await?;
        Ok(result.json::<FilesResponse>()?)
    }

    /// Pages through a listing until a short or empty page.
    async fn list_all(
        &self,
        cid: &str,
        extra: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<Vec<RawFile>, BackendError> {
        let limit = self.settings.page_size;
        let mut offset = 0u64;
        let mut items = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let page = self.files_page(cid, offset, limit, extra, cancel).await?;
            let received = page.data.len();
            debug!(cid, offset, received, total = page.count, "Listed page");

            offset += received as u64;
            items.extend(page.data);
            if received < limit as usize {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait::async_trait]
impl StorageBackend for Drive115Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::Drive115
    }

    #[tracing::instrument(skip(self, cancel), fields(backend = "115"))]
    async fn list_children(
        &self,
        parent_path: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncFileEntry>, BackendError> {
        let items = self
            .list_all(parent_id, &[("show_dir", "1"), ("cur", "1")], cancel)
            .await?;

        let mut entries = Vec::with_capacity(items.len());
        let mut skipped = 0usize;
        for item in items {
            if item.is_deleted() {
                skipped += 1;
                continue;
            }
            let entry = item.into_entry(parent_id, parent_path);
            if entry.is_dir() {
                self.remember_dir(&entry.remote_path(), &entry.id);
            }
            entries.push(entry);
        }

        debug!(entries = entries.len(), skipped, "Listed directory");
        Ok(entries)
    }

    async fn create_directory(
        &self,
        parent_id: &str,
        parent_path: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let result = self
            .send(
                || {
                    self.request(Method::POST, FOLDER_ADD_PATH)
                        .form(&[("pid", parent_id), ("file_name", name)])
                        .build()
                },
                cancel,
            )
            .await?;
        let added: FolderAdded = result.envelope.data_as()?;

        let path = paths::join_remote(parent_path, name);
        info!(path = %path, id = %added.file_id, "Created directory");
        self.remember_dir(&path, &added.file_id);
        Ok(added.file_id)
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
        if let Some(id) = self.cached_id(&path) {
            return Ok(id);
        }

        let result = self
            .send(
                || {
                    self.request(Method::GET, FOLDER_INFO_PATH)
                        .query(&[("path", path.as_str())])
                        .build()
                },
                cancel,
            )
            .await;

        let info = match result {
            Ok(result) => result.envelope.data_as::<FolderInfo>().ok(),
            // The open API reports a missing folder as a plain API error
            Err(BackendError::Api { code, message }) => {
                debug!(path = %path, code, %message, "Folder lookup failed");
                None
            }
            Err(e) => return Err(e),
        };

        match info {
            Some(info) if !info.file_id.is_empty() && info.file_id != ROOT_ID => {
                self.remember_dir(&path, &info.file_id);
                Ok(info.file_id)
            }
            _ => Err(BackendError::NotFound(path)),
        }
    }

    fn build_reference(&self, entry: &SyncFileEntry) -> String {
        format!(
            "{}/115/url/video{}?pickcode={}&userid={}",
            self.settings.strm_base_url.trim_end_matches('/'),
            entry.extension().unwrap_or_default(),
            entry.pick_code.as_deref().unwrap_or_default(),
            self.settings.user_id,
        )
    }

    async fn count_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(u64, Option<String>), BackendError> {
        let page = self
            .files_page(ROOT_ID, 0, 1, &[("show_dir", "0"), ("cur", "0")], cancel)
            .await?;
        let first = page.data.into_iter().next().map(|f| f.fid);
        Ok((page.count, first))
    }

    #[tracing::instrument(skip(self, cancel), fields(backend = "115"))]
    async fn list_subdirectories(
        &self,
        parent_path: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathQueueItem>, BackendError> {
        let folders: Vec<RawFile> = self
            .list_all(parent_id, &[("nf", "1"), ("cur", "0"), ("show_dir", "1")], cancel)
            .await?
            .into_iter()
            .filter(|f| f.is_folder() && !f.is_deleted())
            .collect();

        // Folders arrive in no particular order; resolve paths from the
        // parent downwards until no more can be placed.
        let mut known: HashMap<String, String> = HashMap::new();
        known.insert(parent_id.to_string(), paths::normalize_remote_path(parent_path));
        let mut pending = folders;
        let mut items = Vec::new();
        loop {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for folder in pending {
                match known.get(&folder.pid).cloned() {
                    Some(parent) => {
                        let path = paths::join_remote(&parent, &folder.name);
                        self.remember_dir(&path, &folder.fid);
                        items.push(
                            PathQueueItem::new(&path, folder.fid.clone())
                                .with_modified(folder.modified()),
                        );
                        known.insert(folder.fid, path);
                    }
                    None => unresolved.push(folder),
                }
            }
            if unresolved.is_empty() || unresolved.len() == before {
                if !unresolved.is_empty() {
                    warn!(orphans = unresolved.len(), "Folders with unknown parents dropped");
                }
                break;
            }
            pending = unresolved;
        }

        debug!(directories = items.len(), "Listed subdirectories");
        Ok(items)
    }

    async fn list_files_since(
        &self,
        parent_id: &str,
        offset: u64,
        page_size: u32,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<IncrementalBatch, BackendError> {
        let page_size = page_size.clamp(1, DRIVE115_MAX_PAGE_SIZE);
        let page = self
            .files_page(
                parent_id,
                offset,
                page_size,
                &[("o", "user_utime"), ("asc", "0"), ("cur", "0"), ("show_dir", "0")],
                cancel,
            )
            .await?;

        let received = page.data.len();
        let mut batch = IncrementalBatch::empty();
        for item in page.data {
            if item.is_folder() || item.is_deleted() {
                continue;
            }
            if item.modified() <= since {
                batch.reached_cursor = true;
                break;
            }
            let Some(parent_path) = self.dir_paths.get(&item.pid).map(|p| p.clone()) else {
                // Path unknown until the folder is listed or preloaded
                warn!(
                    fid = %item.fid,
                    pid = %item.pid,
                    name = %item.name,
                    "Skipping file in unknown folder"
                );
                continue;
            };
            batch.entries.push(item.into_entry(parent_id, &parent_path));
        }

        if !batch.reached_cursor && received == page_size as usize {
            batch.next_offset = Some(offset + received as u64);
        }
        Ok(batch)
    }

    async fn delete_files(
        &self,
        parent_id: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for id in ids {
            let result = self
                .send(
                    || {
                        self.request(Method::POST, DELETE_PATH)
                            .form(&[("file_ids", id.as_str()), ("parent_id", parent_id)])
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
