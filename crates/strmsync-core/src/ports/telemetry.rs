//! Request telemetry and credential hooks
//!
//! Fired by the request executor. Both hooks are optional and neither may
//! block request processing: stats are saved from a spawned task, and the
//! credential listener is expected to hand the event off and return.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BackendKind;

/// One executed (or throttled) request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// When the request finished
    pub timestamp: DateTime<Utc>,
    /// Target URL without the query string
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Wall-clock time from dispatch to parsed response
    pub duration: Duration,
    /// Whether the backend rejected the request for frequency
    pub throttled: bool,
}

/// Persistence callback for request statistics
#[async_trait::async_trait]
pub trait StatsSink: Send + Sync {
    async fn save_stat(&self, record: RequestRecord) -> anyhow::Result<()>;
}

/// Notified when a backend rejects our credentials
///
/// The refresh flow itself lives outside this workspace.
pub trait CredentialListener: Send + Sync {
    fn credential_invalid(&self, backend: BackendKind, code: i64, message: &str);
}
