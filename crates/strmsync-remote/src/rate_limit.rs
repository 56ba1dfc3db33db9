//! Request quotas for backend APIs
//!
//! Cloud drive APIs publish limits per second, per minute and per hour at the
//! same time. Each window gets its own [`WindowLimiter`]; a request must pass
//! all three (in that order) before it is dispatched.
//!
//! ## Architecture
//!
//! - [`WindowLimiter`]: sliding window admission log for one period
//! - [`RateLimiterTriple`]: the three windows acquired in sequence
//!
//! ## Design Notes
//!
//! - The admission log keeps the instant of every admission still inside the
//!   window, so the guarantee is exact: at most `limit` admissions in any
//!   interval of length `period`. Bursts up to the limit are allowed.
//! - Time is read from `tokio::time::Instant`, which makes the windows
//!   testable with a paused clock.
//! - Waiting is cancellable through the caller's token.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strmsync_core::config::RateLimitingConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ClientError;

/// Minimum sleep between availability checks
const MIN_WAIT: Duration = Duration::from_millis(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// WindowLimiter
// ============================================================================

/// Internal mutable state for one window, protected by a Mutex.
#[derive(Debug)]
struct WindowState {
    /// Admissions allowed per period
    limit: u32,
    /// Admission instants still inside the window, oldest first
    admitted: VecDeque<Instant>,
}

impl WindowState {
    /// Drops admissions that are a full period old or older.
    fn prune(&mut self, now: Instant, period: Duration) {
        while let Some(front) = self.admitted.front() {
            if now.duration_since(*front) >= period {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding window limiter for a single period.
///
/// Thread safety is provided by an internal `Mutex<WindowState>`.
#[derive(Debug)]
pub struct WindowLimiter {
    /// Window name used in logs (`second`, `minute`, `hour`)
    name: &'static str,
    /// Window length
    period: Duration,
    state: Mutex<WindowState>,
}

impl WindowLimiter {
    /// Creates a limiter admitting `limit` requests per `period`.
    ///
    /// A limit of 0 is treated as 1 so the window can never block forever.
    pub fn new(name: &'static str, limit: u32, period: Duration) -> Self {
        Self {
            name,
            period,
            state: Mutex::new(WindowState {
                limit: limit.max(1),
                admitted: VecDeque::new(),
            }),
        }
    }

    /// Attempts to admit one request now.
    ///
    /// Returns `false` without recording anything when the window is full.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.prune(now, self.period);

        if state.admitted.len() < state.limit as usize {
            state.admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest admission leaves the window.
    ///
    /// Zero when a request could be admitted right away.
    pub fn time_until_available(&self) -> Duration {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.prune(now, self.period);

        if state.admitted.len() < state.limit as usize {
            return Duration::ZERO;
        }
        // Only the entries beyond the limit need to expire (the limit may
        // have been lowered since they were admitted).
        let excess = state.admitted.len() - state.limit as usize;
        state
            .admitted
            .get(excess)
            .map(|oldest| self.period.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Waits until a request is admitted or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            if self.try_acquire() {
                return Ok(());
            }

            let wait = self.time_until_available().max(MIN_WAIT);
            debug!(
                window = self.name,
                wait_ms = wait.as_millis() as u64,
                "Quota window full, waiting"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Changes the limit. Admissions already recorded stay in the window.
    pub fn set_limit(&self, limit: u32) {
        lock(&self.state).limit = limit.max(1);
    }

    pub fn limit(&self) -> u32 {
        lock(&self.state).limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of admissions currently inside the window
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.prune(now, self.period);
        state.admitted.len()
    }
}

// ============================================================================
// QuotaRates / RateLimiterTriple
// ============================================================================

/// Request quotas for the three windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRates {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_hour: u32,
}

impl QuotaRates {
    pub fn new(per_second: u32, per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_second,
            per_minute,
            per_hour,
        }
    }
}

impl Default for QuotaRates {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for QuotaRates {
    fn from(config: &RateLimitingConfig) -> Self {
        Self::new(config.per_second, config.per_minute, config.per_hour)
    }
}

/// Per-second, per-minute and per-hour limiters acquired together.
///
/// Shared by every worker of one executor via `Arc<RateLimiterTriple>`.
#[derive(Debug)]
pub struct RateLimiterTriple {
    second: WindowLimiter,
    minute: WindowLimiter,
    hour: WindowLimiter,
}

impl RateLimiterTriple {
    pub fn new(rates: QuotaRates) -> Self {
        Self {
            second: WindowLimiter::new("second", rates.per_second, Duration::from_secs(1)),
            minute: WindowLimiter::new("minute", rates.per_minute, Duration::from_secs(60)),
            hour: WindowLimiter::new("hour", rates.per_hour, Duration::from_secs(3600)),
        }
    }

    /// Acquires the second, minute and hour windows in order.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.second.acquire(cancel).await?;
        self.minute.acquire(cancel).await?;
        self.hour.acquire(cancel).await?;
        Ok(())
    }

    /// Applies new quotas to all three windows.
    pub fn set_rates(&self, rates: QuotaRates) {
        self.second.set_limit(rates.per_second);
        self.minute.set_limit(rates.per_minute);
        self.hour.set_limit(rates.per_hour);
        debug!(
            per_second = rates.per_second,
            per_minute = rates.per_minute,
            per_hour = rates.per_hour,
            "Quota rates updated"
        );
    }

    pub fn rates(&self) -> QuotaRates {
        QuotaRates::new(self.second.limit(), self.minute.limit(), self.hour.limit())
    }
}
