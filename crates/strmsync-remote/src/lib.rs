//! strmsync Remote - rate-limited access to cloud drive backends
//!
//! Provides:
//! - Three-window request quotas (per second, minute, hour)
//! - A throttle gate that pauses dispatch after a frequency rejection
//! - A worker-pool request executor with typed replies
//! - Storage backend adapters for the pick-code drive and the
//!   path-addressed drive
//!
//! ## Modules
//!
//! - [`rate_limit`] - sliding window limiters and the limiter triple
//! - [`throttle`] - throttle state machine shared by one executor
//! - [`envelope`] - response envelope parsing and error code tables
//! - [`stats`] - bounded window of request records
//! - [`executor`] - bounded request queue drained by a worker pool
//! - [`drive115`] / [`openlist`] - `StorageBackend` implementations

pub mod drive115;
pub mod envelope;
pub mod executor;
pub mod openlist;
pub mod rate_limit;
pub mod stats;
pub mod throttle;

use strmsync_core::domain::BackendError;
use thiserror::Error;

/// Errors surfaced by the request executor
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request could not be built or sent
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body is not a recognised envelope
    #[error("Unrecognised response envelope: {0}")]
    Envelope(String),

    /// The backend rejected our credentials
    #[error("Credential rejected (code {code}): {message}")]
    CredentialInvalid { code: i64, message: String },

    /// The backend rejected the request for frequency
    #[error("Request frequency too high (code {code}): {message}")]
    RateLimited { code: i64, message: String },

    /// Any other non-success code or HTTP status
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The caller's cancellation token fired before a reply
    #[error("Request cancelled")]
    Cancelled,

    /// The executor was shut down before serving the request
    #[error("Request executor stopped")]
    ExecutorStopped,

    /// The worker dropped the reply slot without answering
    #[error("Reply dropped before completion")]
    ReplyDropped,
}

impl ClientError {
    /// Whether the backend signalled excessive request frequency
    pub fn is_throttled(&self) -> bool {
        matches!(self, ClientError::RateLimited { .. })
    }
}

impl From<ClientError> for BackendError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(e) => BackendError::Transport(e.to_string()),
            ClientError::Envelope(msg) => BackendError::InvalidResponse(msg),
            ClientError::CredentialInvalid { code, message } => {
                BackendError::CredentialInvalid { code, message }
            }
            ClientError::RateLimited { code, message } => {
                BackendError::RateLimited { code, message }
            }
            ClientError::Api { code, message } => BackendError::Api { code, message },
            ClientError::Cancelled => BackendError::Cancelled,
            other @ (ClientError::ExecutorStopped | ClientError::ReplyDropped) => {
                BackendError::Transport(other.to_string())
            }
        }
    }
}
