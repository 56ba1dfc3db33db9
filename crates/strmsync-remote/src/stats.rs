//! Request statistics window
//!
//! Keeps the most recent request records in memory so callers can see how
//! close they run to each quota. Persistence is optional and happens through
//! the [`StatsSink`](strmsync_core::ports::StatsSink) port.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strmsync_core::ports::RequestRecord;

/// Aggregated view over the request window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Requests finished within the last second
    pub last_second: usize,
    /// Requests finished within the last minute
    pub last_minute: usize,
    /// Requests finished within the last hour
    pub last_hour: usize,
    /// Records in the window flagged as throttled
    pub throttled: usize,
    /// Number of Normal to Throttled transitions since creation
    pub throttle_events: u64,
    /// Mean duration over the window
    pub average_duration: Duration,
    /// Records currently held
    pub window_len: usize,
}

/// Bounded FIFO of request records
#[derive(Debug)]
pub struct RequestStats {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
    throttle_events: AtomicU64,
}

impl RequestStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            throttle_events: AtomicU64::new(0),
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn record(&self, record: RequestRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Counts one throttle transition.
    pub fn record_throttle_event(&self) {
        self.throttle_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Snapshot relative to `now`
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let within = |secs: i64| {
            records
                .iter()
                .filter(|r| now.signed_duration_since(r.timestamp) < chrono::Duration::seconds(secs))
                .count()
        };

        let total: Duration = records.iter().map(|r| r.duration).sum();
        let average_duration = if records.is_empty() {
            Duration::ZERO
        } else {
            total / records.len() as u32
        };

        StatsSnapshot {
            last_second: within(1),
            last_minute: within(60),
            last_hour: within(3600),
            throttled: records.iter().filter(|r| r.throttled).count(),
            throttle_events: self.throttle_events.load(Ordering::Relaxed),
            average_duration,
            window_len: records.len(),
        }
    }

    /// Copy of the records currently held, oldest first
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
