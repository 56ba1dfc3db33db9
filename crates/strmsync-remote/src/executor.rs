//! Rate-limited request executor
//!
//! Every backend call goes through one [`RequestExecutor`] per backend
//! client. Callers submit a built `reqwest::Request`; a fixed pool of workers
//! drains a bounded queue, applies the throttle gate and the quota triple,
//! sends the request, classifies the response envelope and replies on a
//! one-shot channel.
//!
//! ## Design Notes
//!
//! - The pool size follows the per-second quota: `max(2, qps + qps / 2)`.
//! - Workers share the receiver through `Arc<tokio::sync::Mutex<Receiver>>`;
//!   one worker waits on the channel at a time.
//! - [`RequestExecutor::reconfigure`] restarts the pool when its size
//!   changes. Requests already sent complete and reply before the old
//!   worker exits. Requests still waiting for the gate or a quota go back to
//!   the channel, and queued ones stay there; the new pool serves both.
//! - [`RequestExecutor::shutdown`] replies `ExecutorStopped` to everything
//!   not yet sent, including requests waiting for the gate or a quota.
//! - A reply slot is used exactly once. A caller that stopped waiting is
//!   logged and its result dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Request, StatusCode};
use strmsync_core::config::RateLimitingConfig;
use strmsync_core::domain::BackendKind;
use strmsync_core::ports::{CredentialListener, RequestRecord, StatsSink};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::envelope::{CodeTable, Envelope};
use crate::rate_limit::{QuotaRates, RateLimiterTriple};
use crate::stats::{RequestStats, StatsSnapshot};
use crate::throttle::{ThrottleGate, ThrottleStatus};
use crate::ClientError;

/// Default capacity of the request queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Worker count for a per-second quota
pub fn pool_size(per_second: u32) -> usize {
    let qps = per_second as usize;
    (qps + qps / 2).max(2)
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rates: QuotaRates,
    pub queue_capacity: usize,
    pub throttle_cooldown: Duration,
    pub throttle_poll_interval: Duration,
    pub stats_window: usize,
    /// Whether quota-bypassing requests still wait for the throttle gate
    pub bypass_waits_for_throttle: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for ExecutorConfig {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            rates: QuotaRates::from(config),
            queue_capacity: config.queue_capacity.max(1),
            throttle_cooldown: Duration::from_secs(config.throttle_cooldown_secs),
            throttle_poll_interval: Duration::from_millis(config.throttle_poll_ms),
            stats_window: config.stats_window,
            bypass_waits_for_throttle: config.bypass_waits_for_throttle,
        }
    }
}

// ============================================================================
// Request / result types
// ============================================================================

/// Per-request submission options
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip quota acquisition
    pub bypass: bool,
}

impl RequestOptions {
    pub fn bypass() -> Self {
        Self { bypass: true }
    }
}

/// A successful, classified response
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub status: StatusCode,
    /// Raw response body
    pub body: Vec<u8>,
    /// Parsed envelope (always a success envelope)
    pub envelope: Envelope,
    /// Time from dispatch to a fully read body
    pub duration: Duration,
}

impl RequestResult {
    /// Deserializes the whole body into a typed response.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Envelope(format!("unexpected response shape: {e}")))
    }
}

type Reply = Result<RequestResult, ClientError>;

/// A request owned by the executor between enqueue and reply
struct QueuedRequest {
    request: Request,
    options: RequestOptions,
    cancel: CancellationToken,
    reply: oneshot::Sender<Reply>,
}

// ============================================================================
// Shared worker state
// ============================================================================

struct Shared {
    backend: BackendKind,
    http: Client,
    limiter: Arc<RateLimiterTriple>,
    gate: Arc<ThrottleGate>,
    stats: Arc<RequestStats>,
    codes: CodeTable,
    bypass_waits_for_throttle: bool,
    stats_sink: Option<Arc<dyn StatsSink>>,
    credential_listener: Option<Arc<dyn CredentialListener>>,
    receiver: Mutex<mpsc::Receiver<QueuedRequest>>,
    /// Puts back requests taken by a stopping worker. Weak, so dropping
    /// the executor still closes the channel.
    requeue: mpsc::WeakSender<QueuedRequest>,
    /// Set once `shutdown` begins; released requests then fail
    shutting_down: AtomicBool,
}

impl Shared {
    /// Serves one request taken from the channel.
    ///
    /// Waiting for the gate and the quotas races `stop`; once the request
    /// is sent it runs to completion.
    async fn serve(&self, queued: QueuedRequest, stop: &CancellationToken) {
        let admitted = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            admitted = self.admit(queued.options, &queued.cancel) => Some(admitted),
        };

        let result = match admitted {
            None => return self.release(queued),
            Some(Err(err)) => Err(err),
            Some(Ok(())) => self.dispatch(queued.request, &queued.cancel).await,
        };
        if queued.reply.send(result).is_err() {
            debug!(backend = %self.backend, "Caller stopped waiting, dropping reply");
        }
    }

    /// Waits for the throttle gate and, unless bypassed, the quotas.
    async fn admit(
        &self,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        if !options.bypass || self.bypass_waits_for_throttle {
            self.gate.wait_for_recovery(cancel).await?;
        }
        if !options.bypass {
            self.limiter.acquire(cancel).await?;
        }
        Ok(())
    }

    /// Hands back a request whose worker stopped before sending it.
    ///
    /// During a pool restart the request goes back to the channel for the
    /// new workers; on shutdown (or a full channel) it fails.
    fn release(&self, queued: QueuedRequest) {
        let sender = match self.requeue.upgrade() {
            Some(sender) if !self.shutting_down.load(Ordering::SeqCst) => sender,
            _ => return Self::reply_stopped(queued),
        };
        match sender.try_send(queued) {
            Ok(()) => debug!(backend = %self.backend, "Requeued request from stopped worker"),
            Err(err) => Self::reply_stopped(err.into_inner()),
        }
    }

    fn reply_stopped(queued: QueuedRequest) {
        if queued.reply.send(Err(ClientError::ExecutorStopped)).is_err() {
            debug!("Caller stopped waiting, dropping reply");
        }
    }

    async fn dispatch(&self, request: Request, cancel: &CancellationToken) -> Reply {
        let mut url = request.url().clone();
        url.set_query(None);
        let method = request.method().to_string();

        let started = Instant::now();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = self.http.execute(request) => response?,
        };
        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            body = response.bytes() => body?.to_vec(),
        };
        let duration = started.elapsed();

        let outcome = self.classify(status, body, duration);
        let throttled = matches!(outcome, Err(ClientError::RateLimited { .. }));
        debug!(
            backend = %self.backend,
            %method,
            url = %url,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            throttled,
            "Request completed"
        );

        self.record(RequestRecord {
            timestamp: Utc::now(),
            url: url.to_string(),
            method,
            duration,
            throttled,
        });
        outcome
    }

    /// Maps a response onto a typed result, firing the gate and the
    /// credential listener as needed.
    fn classify(&self, status: StatusCode, body: Vec<u8>, duration: Duration) -> Reply {
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.gate.mark_throttled();
            let message = Envelope::parse(&body).map(|e| e.message).unwrap_or_default();
            return Err(ClientError::RateLimited {
                code: i64::from(status.as_u16()),
                message,
            });
        }

        let envelope = match Envelope::parse(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(self.classify_code(
                    i64::from(status.as_u16()),
                    status.canonical_reason().unwrap_or("HTTP error").to_string(),
                ))
            }
            Err(err) => return Err(err),
        };

        if !envelope.success || !status.is_success() {
            let code = if envelope.code != 0 {
                envelope.code
            } else {
                i64::from(status.as_u16())
            };
            return Err(self.classify_code(code, envelope.message));
        }

        Ok(RequestResult {
            status,
            body,
            envelope,
            duration,
        })
    }

    fn classify_code(&self, code: i64, message: String) -> ClientError {
        if self.codes.is_credential(code) {
            warn!(backend = %self.backend, code, %message, "Backend rejected credentials");
            if let Some(listener) = &self.credential_listener {
                listener.credential_invalid(self.backend, code, &message);
            }
            ClientError::CredentialInvalid { code, message }
        } else if self.codes.is_rate_limited(code) {
            self.gate.mark_throttled();
            ClientError::RateLimited { code, message }
        } else {
            ClientError::Api { code, message }
        }
    }

    fn record(&self, record: RequestRecord) {
        if let Some(sink) = &self.stats_sink {
            let sink = Arc::clone(sink);
            let row = record.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.save_stat(row).await {
                    warn!(error = %e, "Failed to persist request statistic");
                }
            });
        }
        self.stats.record(record);
    }
}

// ============================================================================
// Worker pool
// ============================================================================

struct WorkerPool {
    stop: CancellationToken,
    workers: JoinSet<()>,
    size: usize,
}

impl WorkerPool {
    fn start(shared: &Arc<Shared>, size: usize) -> Self {
        let stop = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker_id in 0..size {
            let shared = Arc::clone(shared);
            let stop = stop.clone();
            workers.spawn(worker_loop(worker_id, shared, stop));
        }
        debug!(workers = size, "Request worker pool started");
        Self {
            stop,
            workers,
            size,
        }
    }

    /// Signals the workers and waits until every in-flight request replied.
    async fn stop(mut self) {
        self.stop.cancel();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request worker panicked");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, stop: CancellationToken) {
    loop {
        let next = {
            let mut receiver = shared.receiver.lock().await;
            tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                queued = receiver.recv() => queued,
            }
        };

        let Some(queued) = next else {
            debug!(worker_id, "Request worker exiting");
            return;
        };
        shared.serve(queued, &stop).await;
    }
}

// ============================================================================
// RequestExecutor
// ============================================================================

/// Bounded request queue drained by a rate-limited worker pool.
///
/// Designed to be shared via `Arc<RequestExecutor>` by one backend adapter.
pub struct RequestExecutor {
    shared: Arc<Shared>,
    sender: mpsc::Sender<QueuedRequest>,
    pool: Mutex<Option<WorkerPool>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("backend", &self.shared.backend)
            .field("rates", &self.shared.limiter.rates())
            .finish()
    }
}

/// Builder for [`RequestExecutor`]
pub struct RequestExecutorBuilder {
    backend: BackendKind,
    config: ExecutorConfig,
    http: Option<Client>,
    codes: CodeTable,
    stats_sink: Option<Arc<dyn StatsSink>>,
    credential_listener: Option<Arc<dyn CredentialListener>>,
}

impl RequestExecutorBuilder {
    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn codes(mut self, codes: CodeTable) -> Self {
        self.codes = codes;
        self
    }

    pub fn stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    pub fn credential_listener(mut self, listener: Arc<dyn CredentialListener>) -> Self {
        self.credential_listener = Some(listener);
        self
    }

    /// Builds the executor and starts its worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Arc<RequestExecutor> {
        let config = self.config;
        let stats = Arc::new(RequestStats::new(config.stats_window));
        let gate = Arc::new(
            ThrottleGate::new(config.throttle_cooldown, config.throttle_poll_interval)
                .with_stats(Arc::clone(&stats)),
        );
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let shared = Arc::new(Shared {
            backend: self.backend,
            http: self.http.unwrap_or_default(),
            limiter: Arc::new(RateLimiterTriple::new(config.rates)),
            gate,
            stats,
            codes: self.codes,
            bypass_waits_for_throttle: config.bypass_waits_for_throttle,
            stats_sink: self.stats_sink,
            credential_listener: self.credential_listener,
            receiver: Mutex::new(receiver),
            requeue: sender.downgrade(),
            shutting_down: AtomicBool::new(false),
        });

        let size = pool_size(config.rates.per_second);
        let pool = WorkerPool::start(&shared, size);
        info!(
            backend = %self.backend,
            workers = size,
            per_second = config.rates.per_second,
            per_minute = config.rates.per_minute,
            per_hour = config.rates.per_hour,
            "Request executor started"
        );

        Arc::new(RequestExecutor {
            shared,
            sender,
            pool: Mutex::new(Some(pool)),
        })
    }
}

impl RequestExecutor {
    pub fn builder(backend: BackendKind, config: ExecutorConfig) -> RequestExecutorBuilder {
        RequestExecutorBuilder {
            backend,
            config,
            http: None,
            codes: CodeTable::default(),
            stats_sink: None,
            credential_listener: None,
        }
    }

    /// Submits a request and waits for its classified result.
    ///
    /// Blocks while the queue is full. `cancel` aborts the wait at every
    /// stage (enqueue, gate, quotas, network, reply).
    pub async fn execute(
        &self,
        request: Request,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<RequestResult, ClientError> {
        let (reply, response) = oneshot::channel();
        let queued = QueuedRequest {
            request,
            options,
            cancel: cancel.clone(),
            reply,
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            sent = self.sender.send(queued) => {
                if sent.is_err() {
                    return Err(ClientError::ExecutorStopped);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            reply = response => reply.unwrap_or(Err(ClientError::ReplyDropped)),
        }
    }

    /// Executes a request, sleeping `backoff` and resending whenever the
    /// backend answers "frequency too high".
    ///
    /// `build` is called once per attempt because a sent request cannot be
    /// reused. Every other outcome is returned as is. This backoff is local
    /// to the caller and independent of the throttle gate, which the
    /// executor marks on the same responses.
    pub async fn execute_with_backoff<F>(
        &self,
        build: F,
        options: RequestOptions,
        backoff: Duration,
        cancel: &CancellationToken,
    ) -> Result<RequestResult, ClientError>
    where
        F: Fn() -> Result<Request, reqwest::Error>,
    {
        let mut backoffs = 0u32;
        loop {
            let request = build()?;
            let url = request.url().path().to_string();
            match self.execute(request, options, cancel).await {
                Err(ClientError::RateLimited { code, message }) => {
                    backoffs += 1;
                    warn!(
                        backend = %self.shared.backend,
                        path = %url,
                        code,
                        %message,
                        backoffs,
                        backoff_ms = backoff.as_millis() as u64,
                        "Request frequency too high, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => {
                    if backoffs > 0 && other.is_ok() {
                        info!(path = %url, backoffs, "Request succeeded after backoff");
                    }
                    return other;
                }
            }
        }
    }

    /// Applies new quotas and resizes the worker pool if needed.
    pub async fn reconfigure(&self, rates: QuotaRates) {
        self.shared.limiter.set_rates(rates);
        let size = pool_size(rates.per_second);

        let mut pool = self.pool.lock().await;
        let Some(current) = pool.take() else {
            debug!("Executor stopped, quotas updated without restarting workers");
            return;
        };
        if current.size == size {
            *pool = Some(current);
            return;
        }

        info!(
            backend = %self.shared.backend,
            old_workers = current.size,
            new_workers = size,
            "Restarting request worker pool"
        );
        current.stop().await;
        *pool = Some(WorkerPool::start(&self.shared, size));
    }

    /// Stops the workers and fails every request still queued.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.lock().await.take() {
            pool.stop().await;
        }

        let mut receiver = self.shared.receiver.lock().await;
        receiver.close();
        let mut rejected = 0usize;
        while let Ok(queued) = receiver.try_recv() {
            let _ = queued.reply.send(Err(ClientError::ExecutorStopped));
            rejected += 1;
        }
        info!(
            backend = %self.shared.backend,
            rejected,
            "Request executor stopped"
        );
    }

    /// Current worker count, 0 once shut down
    pub async fn worker_count(&self) -> usize {
        self.pool.lock().await.as_ref().map_or(0, |p| p.size)
    }

    pub fn backend(&self) -> BackendKind {
        self.shared.backend
    }

    /// HTTP client used to send requests; adapters build requests with it.
    pub fn http_client(&self) -> &Client {
        &self.shared.http
    }

    pub fn throttle_gate(&self) -> &Arc<ThrottleGate> {
        &self.shared.gate
    }

    pub fn throttle_status(&self) -> ThrottleStatus {
        self.shared.gate.status()
    }

    pub fn rates(&self) -> QuotaRates {
        self.shared.limiter.rates()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}
