//! Integration tests for the request executor: throttle gate, quotas,
//! pool resizing and shutdown against a live mock server

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use strmsync_core::domain::BackendKind;
use strmsync_core::ports::{RequestRecord, StatsSink};
use strmsync_remote::envelope::CodeTable;
use strmsync_remote::executor::{ExecutorConfig, RequestExecutor, RequestOptions};
use strmsync_remote::rate_limit::QuotaRates;
use strmsync_remote::ClientError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, drive_err, drive_ok};

fn start_executor(config: ExecutorConfig) -> Arc<RequestExecutor> {
    RequestExecutor::builder(BackendKind::Drive115, config)
        .codes(CodeTable::drive115())
        .start()
}

fn ping(executor: &RequestExecutor, server: &MockServer) -> reqwest::Request {
    executor
        .http_client()
        .get(format!("{}/ping", server.uri()))
        .build()
        .unwrap()
}

async fn mount_ok(server: &MockServer, delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(drive_ok(json!({})))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

async fn mount_429_once(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_http_429_closes_gate_for_cooldown() {
    let server = MockServer::start().await;
    mount_429_once(&server).await;
    mount_ok(&server, Duration::ZERO).await;

    let mut config = common::fast_config();
    config.throttle_cooldown = Duration::from_millis(300);
    let executor = start_executor(config);
    let cancel = CancellationToken::new();

    let err = executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_throttled());
    assert!(executor.throttle_status().is_throttled);

    let started = Instant::now();
    executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await
        .expect("request after cooldown failed");
    assert!(started.elapsed() >= Duration::from_millis(250));

    let stats = executor.stats();
    assert_eq!(stats.throttled, 1);
    assert_eq!(stats.throttle_events, 1);
    assert!(!executor.throttle_status().is_throttled);
}

#[tokio::test]
async fn test_bypass_request_skips_gate_when_configured() {
    let server = MockServer::start().await;
    mount_429_once(&server).await;
    mount_ok(&server, Duration::ZERO).await;

    let mut config = common::fast_config();
    config.throttle_cooldown = Duration::from_secs(5);
    config.bypass_waits_for_throttle = false;
    let executor = start_executor(config);
    let cancel = CancellationToken::new();

    let _ = executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await;
    assert!(executor.throttle_status().is_throttled);

    let started = Instant::now();
    executor
        .execute(ping(&executor, &server), RequestOptions::bypass(), &cancel)
        .await
        .expect("bypass request failed");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_bypass_request_waits_for_gate_by_default() {
    let server = MockServer::start().await;
    mount_429_once(&server).await;
    mount_ok(&server, Duration::ZERO).await;

    let mut config = common::fast_config();
    config.throttle_cooldown = Duration::from_millis(300);
    let executor = start_executor(config);
    let cancel = CancellationToken::new();

    let _ = executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await;

    let started = Instant::now();
    executor
        .execute(ping(&executor, &server), RequestOptions::bypass(), &cancel)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_cancel_while_gated() {
    let server = MockServer::start().await;
    mount_ok(&server, Duration::ZERO).await;

    let mut config = common::fast_config();
    config.throttle_cooldown = Duration::from_secs(30);
    let executor = start_executor(config);
    assert!(executor.throttle_gate().mark_throttled());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api-error"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_err(990002, "bad param")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gateway"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let executor = start_executor(common::fast_config());
    let cancel = CancellationToken::new();
    let get = |p: &str| {
        executor
            .http_client()
            .get(format!("{}{}", server.uri(), p))
            .build()
            .unwrap()
    };

    let err = executor
        .execute(get("/api-error"), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { code: 990002, .. }));

    let err = executor
        .execute(get("/gateway"), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { code: 502, .. }));

    let err = executor
        .execute(get("/garbage"), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Envelope(_)));

    // None of these close the gate
    assert!(!executor.throttle_status().is_throttled);
}

#[derive(Default)]
struct MemoryStatsSink {
    rows: Mutex<Vec<RequestRecord>>,
}

#[async_trait::async_trait]
impl StatsSink for MemoryStatsSink {
    async fn save_stat(&self, record: RequestRecord) -> anyhow::Result<()> {
        self.rows.lock().unwrap().push(record);
        Ok(())
    }
}

#[tokio::test]
async fn test_stats_sink_receives_records() {
    let server = MockServer::start().await;
    mount_ok(&server, Duration::ZERO).await;

    let sink = Arc::new(MemoryStatsSink::default());
    let executor = RequestExecutor::builder(BackendKind::Drive115, common::fast_config())
        .codes(CodeTable::drive115())
        .stats_sink(sink.clone())
        .start();
    let cancel = CancellationToken::new();

    let request = executor
        .http_client()
        .get(format!("{}/ping?token=secret", server.uri()))
        .build()
        .unwrap();
    executor
        .execute(request, RequestOptions::default(), &cancel)
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while sink.rows.lock().unwrap().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].method, "GET");
    assert!(rows[0].url.ends_with("/ping"));
    assert!(!rows[0].throttled);
    assert_eq!(executor.stats().last_minute, 1);
}

#[tokio::test]
async fn test_reconfigure_under_load_serves_every_request_once() {
    let server = MockServer::start().await;
    mount_ok(&server, Duration::from_millis(20)).await;

    let executor = start_executor(common::fast_config());
    assert_eq!(executor.worker_count().await, 75);

    let cancel = CancellationToken::new();
    let mut callers = JoinSet::new();
    for _ in 0..30 {
        let executor = Arc::clone(&executor);
        let request = ping(&executor, &server);
        let cancel = cancel.clone();
        callers.spawn(async move {
            executor
                .execute(request, RequestOptions::default(), &cancel)
                .await
        });
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    executor.reconfigure(QuotaRates::new(10, 3000, 100_000)).await;
    assert_eq!(executor.worker_count().await, 15);

    let mut ok = 0;
    while let Some(joined) = callers.join_next().await {
        joined.unwrap().expect("request failed across reconfigure");
        ok += 1;
    }
    assert_eq!(ok, 30);
    assert_eq!(server.received_requests().await.unwrap().len(), 30);
}

#[tokio::test]
async fn test_reconfigure_while_gated_requeues_waiting_request() {
    let server = MockServer::start().await;
    mount_ok(&server, Duration::ZERO).await;

    let mut config = common::fast_config();
    config.throttle_cooldown = Duration::from_millis(400);
    let executor = start_executor(config);
    assert!(executor.throttle_gate().mark_throttled());

    let waiting = {
        let executor = Arc::clone(&executor);
        let request = ping(&executor, &server);
        tokio::spawn(async move {
            executor
                .execute(request, RequestOptions::default(), &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The restart does not wait out the cooldown
    let started = Instant::now();
    executor.reconfigure(QuotaRates::new(10, 3000, 100_000)).await;
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(executor.worker_count().await, 15);

    waiting
        .await
        .unwrap()
        .expect("gated request lost across reconfigure");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    executor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_queued_requests() {
    let server = MockServer::start().await;
    mount_ok(&server, Duration::from_millis(200)).await;

    let mut config = common::fast_config();
    config.rates = QuotaRates::new(1, 60, 3600);
    let executor = start_executor(config);
    assert_eq!(executor.worker_count().await, 2);

    let cancel = CancellationToken::new();
    let mut callers = JoinSet::new();
    for _ in 0..6 {
        let executor = Arc::clone(&executor);
        let request = ping(&executor, &server);
        let cancel = cancel.clone();
        callers.spawn(async move {
            executor
                .execute(request, RequestOptions::bypass(), &cancel)
                .await
        });
    }

    // Both workers are now blocked on the delayed response
    tokio::time::sleep(Duration::from_millis(80)).await;
    executor.shutdown().await;
    assert_eq!(executor.worker_count().await, 0);

    let (mut ok, mut stopped) = (0, 0);
    while let Some(joined) = callers.join_next().await {
        match joined.unwrap() {
            Ok(_) => ok += 1,
            Err(ClientError::ExecutorStopped) => stopped += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(stopped, 4);

    let err = executor
        .execute(ping(&executor, &server), RequestOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ExecutorStopped));
}
