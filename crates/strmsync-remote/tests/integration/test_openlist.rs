//! Integration tests for the path-addressed drive adapter

use serde_json::json;
use strmsync_core::domain::{BackendError, BackendKind, SyncFileEntry};
use strmsync_core::ports::StorageBackend;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, list_ok, list_ok_empty, object, ol_err, ol_ok};

#[tokio::test]
async fn test_list_children_pages_by_page_number() {
    let fx = common::setup_openlist(2).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .and(header("Authorization", "list-token"))
        .and(body_partial_json(json!({"path": "/tv", "page": 1, "per_page": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(list_ok(vec![
            object("Show", true, 0),
            object("a.mkv", false, 100),
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .and(body_partial_json(json!({"path": "/tv", "page": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(list_ok(vec![object(
            "b.srt", false, 3,
        )])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/tv/", "/tv", &CancellationToken::new())
        .await
        .expect("listing failed");

    assert_eq!(entries.len(), 3);
    assert!(entries[0].is_dir());
    assert_eq!(entries[0].id, "/tv/Show");
    assert_eq!(entries[1].id, "/tv/a.mkv");
    assert_eq!(entries[1].parent_id, "/tv");
    assert_eq!(entries[1].backend, BackendKind::OpenList);
    assert_eq!(entries[2].size, 3);
}

#[tokio::test]
async fn test_null_content_ends_listing() {
    let fx = common::setup_openlist(2).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list_ok_empty()))
        .expect(1)
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/empty", "/empty", &CancellationToken::new())
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_http_429_backs_off_and_retries() {
    let fx = common::setup_openlist(5).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list_ok(vec![object(
            "a.mkv", false, 1,
        )])))
        .mount(&fx.server)
        .await;

    let entries = fx
        .backend
        .list_children("/", "/", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(fx.server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_resolve_id_maps_missing_object_to_not_found() {
    let fx = common::setup_openlist(10).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/get"))
        .and(body_partial_json(json!({"path": "/media"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200, "message": "success", "data": {"name": "media", "is_dir": true}
        })))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_err(500, "object not found")))
        .mount(&fx.server)
        .await;

    let cancel = CancellationToken::new();
    assert_eq!(fx.backend.resolve_id("/media/", &cancel).await.unwrap(), "/media");
    // Cached
    assert_eq!(fx.backend.resolve_id("/media", &cancel).await.unwrap(), "/media");

    let err = fx.backend.resolve_id("/nope", &cancel).await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn test_list_missing_directory_is_not_found() {
    let fx = common::setup_openlist(10).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_err(500, "object not found")))
        .expect(1)
        .mount(&fx.server)
        .await;

    let err = fx
        .backend
        .list_children("/gone", "/gone", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotFound(ref p) if p == "/gone"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_ensure_directory_path_registers_directories() {
    let fx = common::setup_openlist(10).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_err(500, "object not found")))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/mkdir"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_ok()))
        .expect(2)
        .mount(&fx.server)
        .await;

    let (id, normalized) = fx
        .backend
        .ensure_directory_path("a/b", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(id, "/a/b");
    assert_eq!(normalized, "/a/b");
    assert_eq!(fx.catalog.entries.get("/a").unwrap().parent_id, "/");
    assert_eq!(fx.catalog.entries.get("/a/b").unwrap().parent_id, "/a");
}

#[tokio::test]
async fn test_delete_files_reports_failed_ids() {
    let fx = common::setup_openlist(10).await;

    Mock::given(method("POST"))
        .and(path("/api/fs/remove"))
        .and(body_partial_json(json!({"names": ["locked.mkv"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_err(403, "permission denied")))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/fs/remove"))
        .and(body_partial_json(json!({"dir": "/tv"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ol_ok()))
        .mount(&fx.server)
        .await;

    let ids = vec!["/tv/locked.mkv".to_string(), "/tv/ok.mkv".to_string()];
    let failed = fx
        .backend
        .delete_files("/tv", &ids, &CancellationToken::new())
        .await;
    assert_eq!(failed, vec!["/tv/locked.mkv".to_string()]);
}

#[tokio::test]
async fn test_unsupported_operations_return_empty() {
    let fx = common::setup_openlist(10).await;
    let cancel = CancellationToken::new();

    assert_eq!(fx.backend.count_all(&cancel).await.unwrap(), (0, None));
    assert!(fx
        .backend
        .list_subdirectories("/", "/", &cancel)
        .await
        .unwrap()
        .is_empty());
    let batch = fx
        .backend
        .list_files_since("/", 0, 100, chrono::Utc::now(), &cancel)
        .await
        .unwrap();
    assert!(batch.is_empty());
    assert!(batch.next_offset.is_none());
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_build_reference_encodes_path_and_sign() {
    let fx = common::setup_openlist(10).await;

    let signed = SyncFileEntry::file(BackendKind::OpenList, "/tv/My Show/e01.mkv", "/tv/My Show", "/tv/My Show", "e01.mkv")
        .with_pick_code(Some("abc".into()));
    assert_eq!(
        fx.backend.build_reference(&signed),
        format!("{}/d/tv/My%20Show/e01.mkv?sign=abc", fx.server.uri())
    );

    let unsigned = SyncFileEntry::file(BackendKind::OpenList, "/a.mkv", "/", "/", "a.mkv");
    assert_eq!(
        fx.backend.build_reference(&unsigned),
        format!("{}/d/a.mkv", fx.server.uri())
    );
}
