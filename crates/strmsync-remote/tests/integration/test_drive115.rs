//! Integration tests for the pick-code drive adapter
//!
//! Verifies paging, soft-delete filtering, frequency backoff, credential
//! errors, path resolution, directory creation and best-effort deletes
//! against a wiremock server.

use std::sync::atomic::Ordering;

use chrono::{TimeZone, Utc};
use serde_json::json;
use strmsync_core::domain::{BackendError, BackendKind, SyncFileEntry};
use strmsync_core::ports::StorageBackend;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, drive_err, drive_ok, file_item, files_page, folder_item};

#[tokio::test]
async fn test_list_children_pages_until_short_page() {
    let fx = common::setup_drive115(2).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("cid", "100"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![folder_item("200", "100", "Season 1"), file_item("301", "100", "a.mkv", 10, 1_700_000_000)],
            3,
        )))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![file_item("302", "100", "b.nfo", 5, 1_700_000_000)],
            3,
        )))
        .expect(1)
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/tv/Show", "100", &CancellationToken::new())
        .await
        .expect("listing failed");

    assert_eq!(entries.len(), 3);
    let dir = &entries[0];
    assert!(dir.is_dir());
    assert_eq!(dir.remote_path(), "/tv/Show/Season 1");
    assert_eq!(dir.backend, BackendKind::Drive115);
    let file = &entries[1];
    assert_eq!(file.id, "301");
    assert_eq!(file.parent_id, "100");
    assert_eq!(file.size, 10);
    assert_eq!(file.pick_code.as_deref(), Some("pc301"));
    assert_eq!(file.hash.as_deref(), Some("SHA301"));

    // Discovered directories resolve without another request
    assert_eq!(fx.backend.cached_id("/tv/Show/Season 1").as_deref(), Some("200"));
}

#[tokio::test]
async fn test_full_page_followed_by_empty_page() {
    let fx = common::setup_drive115(2).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![
                file_item("1", "0", "a.mkv", 1, 1_700_000_000),
                file_item("2", "0", "b.mkv", 1, 1_700_000_000),
            ],
            2,
        )))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(vec![], 2)))
        .expect(1)
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/", "0", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(fx.server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_soft_deleted_entries_are_skipped() {
    let fx = common::setup_drive115(10).await;

    let mut deleted = file_item("9", "0", "gone.mkv", 1, 1_700_000_000);
    deleted["aid"] = json!("7");
    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![file_item("1", "0", "kept.mkv", 1, 1_700_000_000), deleted],
            2,
        )))
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/", "0", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "kept.mkv");
}

#[tokio::test]
async fn test_frequency_too_high_backs_off_and_retries_same_page() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(770004, "too frequent")))
        .up_to_n_times(2)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![file_item("1", "0", "a.mkv", 1, 1_700_000_000)],
            1,
        )))
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/", "0", &CancellationToken::new())
        .await
        .expect("backoff should hide frequency errors");

    assert_eq!(entries.len(), 1);
    let requests = fx.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3, "two rejected attempts plus one success");
    assert!(requests.iter().all(|r| r.url.query().unwrap_or("").contains("offset=0")));

    let stats = fx.executor.stats();
    assert_eq!(stats.throttled, 2);
    assert!(stats.throttle_events >= 1);
}

#[tokio::test]
async fn test_credential_error_is_surfaced_and_not_retried() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(40140125, "token expired")))
        .expect(1)
        .mount(&fx.server)
        .await;

    let err = fx
        .backend
        .list_children("/", "0", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::CredentialInvalid { code: 40140125, .. }));
    assert_eq!(fx.listener.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *fx.listener.last.lock().unwrap(),
        Some((BackendKind::Drive115, 40140125))
    );
}

#[tokio::test]
async fn test_resolve_id_uses_cache_after_first_lookup() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/folder/get_info"))
        .and(query_param("path", "/media/tv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_ok(json!({
            "file_id": "555", "file_name": "tv"
        }))))
        .expect(1)
        .mount(&fx.server)
        .await;

    let cancel = CancellationToken::new();
    assert_eq!(fx.backend.resolve_id("media/tv/", &cancel).await.unwrap(), "555");
    assert_eq!(fx.backend.resolve_id("/media/tv", &cancel).await.unwrap(), "555");
    assert_eq!(fx.backend.resolve_id("/", &cancel).await.unwrap(), "0");
}

#[tokio::test]
async fn test_resolve_id_not_found() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/folder/get_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(20018, "no such folder")))
        .mount(&fx.server)
        .await;

    let err = fx
        .backend
        .resolve_id("/missing", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound(ref p) if p == "/missing"));
}

#[tokio::test]
async fn test_ensure_directory_path_creates_missing_suffix() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/folder/get_info"))
        .and(query_param("path", "/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_ok(json!({"file_id": "10"}))))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open/folder/get_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(20018, "no such folder")))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/folder/add"))
        .and(body_string_contains("file_name=Show"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_ok(json!({
            "file_id": "11", "file_name": "Show"
        }))))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/folder/add"))
        .and(body_string_contains("pid=11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_ok(json!({
            "file_id": "12", "file_name": "S01"
        }))))
        .expect(1)
        .mount(&fx.server)
        .await;

    let (id, normalized) = fx
        .backend
        .ensure_directory_path("/media/Show/S01/", &CancellationToken::new())
        .await
        .expect("ensure failed");

    assert_eq!(id, "12");
    assert_eq!(normalized, "/media/Show/S01");
    let show = fx.catalog.entries.get("11").expect("Show registered");
    assert_eq!(show.parent_id, "10");
    assert_eq!(show.remote_path(), "/media/Show");
    assert!(fx.catalog.entries.contains_key("12"));
    assert_eq!(fx.backend.cached_id("/media/Show/S01").as_deref(), Some("12"));
}

#[tokio::test]
async fn test_delete_files_continues_past_failures() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("POST"))
        .and(path("/open/ufile/delete"))
        .and(body_string_contains("file_ids=bad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(990002, "cannot delete")))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/ufile/delete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_ok(json!([]))))
        .mount(&fx.server)
        .await;

    let ids = vec!["a".to_string(), "bad".to_string(), "c".to_string()];
    let failed = fx
        .backend
        .delete_files("0", &ids, &CancellationToken::new())
        .await;

    assert_eq!(failed, vec!["bad".to_string()]);
    assert_eq!(fx.server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_count_all() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("limit", "1"))
        .and(query_param("cur", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![file_item("77", "5", "x.mkv", 1, 1_700_000_000)],
            4321,
        )))
        .mount(&fx.server)
        .await;

    let (total, first) = fx.backend.count_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(total, 4321);
    assert_eq!(first.as_deref(), Some("77"));
}

#[tokio::test]
async fn test_list_subdirectories_builds_paths_out_of_order() {
    let fx = common::setup_drive115(10).await;

    // Grandchild listed before its parent
    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("nf", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![
                folder_item("3", "2", "Season 1"),
                folder_item("2", "1", "Show"),
                folder_item("4", "1", "Movie"),
            ],
            3,
        )))
        .mount(&fx.server)
        .await;

    let mut items = fx
        .backend
        .list_subdirectories("/media", "1", &CancellationToken::new())
        .await
        .unwrap();
    items.sort_by(|a, b| a.path.cmp(&b.path));

    let found: Vec<_> = items.iter().map(|i| (i.path.as_str(), i.id.as_str())).collect();
    assert_eq!(
        found,
        vec![("/media/Movie", "4"), ("/media/Show", "2"), ("/media/Show/Season 1", "3")]
    );
    assert_eq!(fx.backend.cached_id("/media/Show/Season 1").as_deref(), Some("3"));
}

#[tokio::test]
async fn test_list_files_since_stops_at_cursor() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("o", "user_utime"))
        .and(query_param("asc", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![
                file_item("3", "0", "new.mkv", 1, 1_700_000_300),
                file_item("2", "0", "newer.nfo", 1, 1_700_000_200),
                file_item("1", "0", "old.mkv", 1, 1_700_000_000),
            ],
            3,
        )))
        .mount(&fx.server)
        .await;

    let since = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
    let batch = fx
        .backend
        .list_files_since("0", 0, 3, since, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(batch.entries.len(), 2);
    assert!(batch.reached_cursor);
    assert!(batch.next_offset.is_none());
    assert_eq!(batch.entries[0].remote_path(), "/new.mkv");
}

#[tokio::test]
async fn test_list_files_since_skips_files_in_unknown_folders() {
    let fx = common::setup_drive115(10).await;

    Mock::given(method("GET"))
        .and(path("/open/ufile/files"))
        .and(query_param("o", "user_utime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_page(
            vec![
                file_item("3", "0", "root.mkv", 1, 1_700_000_300),
                file_item("4", "77", "stray.mkv", 1, 1_700_000_200),
            ],
            2,
        )))
        .mount(&fx.server)
        .await;

    let since = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
    let batch = fx
        .backend
        .list_files_since("0", 0, 10, since, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(batch.entries.len(), 1);
    assert_eq!(batch.entries[0].remote_path(), "/root.mkv");
    assert!(batch.entries.iter().all(|e| e.id != "4"));
}

#[tokio::test]
async fn test_build_reference() {
    let fx = common::setup_drive115(10).await;

    let entry = SyncFileEntry::file(BackendKind::Drive115, "1", "0", "/movies", "Film.MKV")
        .with_pick_code(Some("abc123".into()));
    assert_eq!(
        fx.backend.build_reference(&entry),
        "http://strm.local:12333/115/url/video.mkv?pickcode=abc123&userid=10086"
    );
}
