//! Shared test helpers for backend integration tests
//!
//! Builds executors with short cooldowns so throttle and backoff paths run
//! in milliseconds, and provides a recording catalog and credential listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use wiremock::MockServer;

use strmsync_core::domain::{BackendKind, SyncFileEntry};
use strmsync_core::ports::{CatalogError, CatalogSink, CredentialListener};
use strmsync_remote::drive115::{Drive115Backend, Drive115Settings};
use strmsync_remote::envelope::CodeTable;
use strmsync_remote::executor::{ExecutorConfig, RequestExecutor};
use strmsync_remote::openlist::{OpenListBackend, OpenListSettings};
use strmsync_remote::rate_limit::QuotaRates;

/// Local backoff used by adapters under test
pub const BACKOFF: Duration = Duration::from_millis(20);

/// Executor settings with generous quotas and a short throttle cooldown
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        rates: QuotaRates::new(50, 3000, 100_000),
        queue_capacity: 100,
        throttle_cooldown: Duration::from_millis(50),
        throttle_poll_interval: Duration::from_millis(5),
        stats_window: 100,
        bypass_waits_for_throttle: true,
    }
}

#[derive(Default)]
pub struct RecordingCatalog {
    pub entries: DashMap<String, SyncFileEntry>,
}

impl CatalogSink for RecordingCatalog {
    fn insert(&self, entry: SyncFileEntry) -> Result<bool, CatalogError> {
        Ok(self.entries.insert(entry.id.clone(), entry).is_none())
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn mark_processed(&self, id: &str) -> Result<(), CatalogError> {
        self.entries
            .get_mut(id)
            .map(|mut e| e.processed = true)
            .ok_or_else(|| CatalogError::UnknownEntry(id.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub calls: AtomicUsize,
    pub last: Mutex<Option<(BackendKind, i64)>>,
}

impl CredentialListener for RecordingListener {
    fn credential_invalid(&self, backend: BackendKind, code: i64, _message: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((backend, code));
    }
}

// ============================================================================
// Drive115
// ============================================================================

pub struct Drive115Fixture {
    pub server: MockServer,
    pub backend: Drive115Backend,
    pub executor: Arc<RequestExecutor>,
    pub catalog: Arc<RecordingCatalog>,
    pub listener: Arc<RecordingListener>,
}

pub async fn setup_drive115(page_size: u32) -> Drive115Fixture {
    let server = MockServer::start().await;
    let listener = Arc::new(RecordingListener::default());
    let executor = RequestExecutor::builder(BackendKind::Drive115, fast_config())
        .codes(CodeTable::drive115())
        .credential_listener(listener.clone())
        .start();
    let catalog = Arc::new(RecordingCatalog::default());

    let settings = Drive115Settings {
        base_url: server.uri(),
        access_token: "test-token".into(),
        page_size,
        strm_base_url: "http://strm.local:12333/".into(),
        user_id: "10086".into(),
        frequency_backoff: BACKOFF,
        request_timeout: Duration::from_secs(5),
    };
    let backend = Drive115Backend::new(Arc::clone(&executor), settings, catalog.clone());

    Drive115Fixture {
        server,
        backend,
        executor,
        catalog,
        listener,
    }
}

/// A live file item as returned by the files endpoint
pub fn file_item(fid: &str, pid: &str, name: &str, size: u64, upt: u64) -> Value {
    json!({
        "fid": fid, "pid": pid, "fc": "1", "fn": name, "pc": format!("pc{fid}"),
        "sha1": format!("SHA{fid}"), "fs": size, "upt": upt, "aid": "1"
    })
}

/// A live folder item as returned by the files endpoint
pub fn folder_item(fid: &str, pid: &str, name: &str) -> Value {
    json!({"fid": fid, "pid": pid, "fc": "0", "fn": name, "upt": 1_700_000_000u64, "aid": "1"})
}

pub fn files_page(items: Vec<Value>, count: u64) -> Value {
    json!({"state": true, "code": 0, "message": "", "data": items, "count": count})
}

pub fn drive_ok(data: Value) -> Value {
    json!({"state": true, "code": 0, "message": "", "data": data})
}

pub fn drive_err(code: i64, message: &str) -> Value {
    json!({"state": false, "code": code, "message": message, "data": []})
}

// ============================================================================
// OpenList
// ============================================================================

pub struct OpenListFixture {
    pub server: MockServer,
    pub backend: OpenListBackend,
    pub catalog: Arc<RecordingCatalog>,
}

pub async fn setup_openlist(page_size: u32) -> OpenListFixture {
    let server = MockServer::start().await;
    let executor = RequestExecutor::builder(BackendKind::OpenList, fast_config())
        .codes(CodeTable::openlist())
        .start();
    let catalog = Arc::new(RecordingCatalog::default());
    let settings = OpenListSettings {
        base_url: server.uri(),
        token: "list-token".into(),
        page_size,
        frequency_backoff: BACKOFF,
        request_timeout: Duration::from_secs(5),
    };
    let backend = OpenListBackend::new(executor, settings, catalog.clone());

    OpenListFixture {
        server,
        backend,
        catalog,
    }
}

pub fn list_ok(content: Vec<Value>) -> Value {
    let total = content.len();
    json!({"code": 200, "message": "success", "data": {"content": content, "total": total}})
}

pub fn list_ok_empty() -> Value {
    json!({"code": 200, "message": "success", "data": {"content": null, "total": 0}})
}

pub fn object(name: &str, is_dir: bool, size: u64) -> Value {
    json!({
        "name": name, "size": size, "is_dir": is_dir,
        "modified": "2024-05-01T10:00:00Z", "sign": if is_dir { "" } else { "sig" }
    })
}

pub fn ol_ok() -> Value {
    json!({"code": 200, "message": "success", "data": null})
}

pub fn ol_err(code: i64, message: &str) -> Value {
    json!({"code": code, "message": message, "data": null})
}
