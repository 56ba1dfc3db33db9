//! Throttle state machine
//!
//! When a backend answers with a "frequency too high" code, every request
//! going through the same executor must pause until a cooldown elapses.
//! [`ThrottleGate`] holds that state.
//!
//! ## States
//!
//! - `Normal`: requests pass straight through
//! - `Throttled`: entered by [`ThrottleGate::mark_throttled`], left
//!   automatically once the cooldown has elapsed
//!
//! There is no way to leave `Throttled` early. Expiry is evaluated lazily on
//! every read, so no background task is needed.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stats::RequestStats;
use crate::ClientError;

/// Default cooldown after a throttle rejection
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Default interval between recovery checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time view of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    pub is_throttled: bool,
    /// Time spent in the current throttled period
    pub elapsed: Duration,
    /// Time left before requests resume
    pub remaining: Duration,
}

/// Shared throttle flag for one backend client
#[derive(Debug)]
pub struct ThrottleGate {
    cooldown: Duration,
    poll_interval: Duration,
    /// Start of the current throttled period, `None` when Normal
    throttled_at: Mutex<Option<Instant>>,
    stats: Option<Arc<RequestStats>>,
}

impl ThrottleGate {
    pub fn new(cooldown: Duration, poll_interval: Duration) -> Self {
        Self {
            cooldown,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            throttled_at: Mutex::new(None),
            stats: None,
        }
    }

    /// Counts throttle transitions in `stats`.
    pub fn with_stats(mut self, stats: Arc<RequestStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Enters the Throttled state.
    ///
    /// Returns `true` on the Normal to Throttled transition and `false` when
    /// the gate was already throttled (the cooldown is not extended).
    pub fn mark_throttled(&self) -> bool {
        let now = Instant::now();
        let mut state = self.throttled_at.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(since) = *state {
            if now.duration_since(since) < self.cooldown {
                return false;
            }
        }

        *state = Some(now);
        drop(state);

        warn!(
            cooldown_secs = self.cooldown.as_secs_f64(),
            "Backend reported request frequency too high, pausing requests"
        );
        if let Some(stats) = &self.stats {
            stats.record_throttle_event();
        }
        true
    }

    /// Whether requests must currently wait.
    ///
    /// Clears an expired throttled period as a side effect.
    pub fn is_throttled(&self) -> bool {
        self.status().is_throttled
    }

    pub fn status(&self) -> ThrottleStatus {
        let now = Instant::now();
        let mut state = self.throttled_at.lock().unwrap_or_else(PoisonError::into_inner);

        match *state {
            Some(since) => {
                let elapsed = now.duration_since(since);
                if elapsed >= self.cooldown {
                    *state = None;
                    info!(
                        throttled_secs = elapsed.as_secs_f64(),
                        "Throttle cooldown elapsed, resuming requests"
                    );
                    ThrottleStatus {
                        is_throttled: false,
                        elapsed: Duration::ZERO,
                        remaining: Duration::ZERO,
                    }
                } else {
                    ThrottleStatus {
                        is_throttled: true,
                        elapsed,
                        remaining: self.cooldown - elapsed,
                    }
                }
            }
            None => ThrottleStatus {
                is_throttled: false,
                elapsed: Duration::ZERO,
                remaining: Duration::ZERO,
            },
        }
    }

    /// Returns once the gate is Normal, polling every poll interval.
    pub async fn wait_for_recovery(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            if !self.is_throttled() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, DEFAULT_POLL_INTERVAL)
    }
}
