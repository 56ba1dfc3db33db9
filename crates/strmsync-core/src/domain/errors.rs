//! Backend error taxonomy
//!
//! Every adapter maps its failures into [`BackendError`] so the traversal
//! engine can decide what to retry without knowing which backend it talks to.

use thiserror::Error;

use crate::ports::catalog::CatalogError;

/// Errors surfaced by storage backend adapters
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested path does not exist on the backend
    #[error("Path not found: {0}")]
    NotFound(String),

    /// The backend rejected our credentials (expired or invalid token)
    #[error("Credential rejected (code {code}): {message}")]
    CredentialInvalid { code: i64, message: String },

    /// The backend reported that we exceeded its request frequency
    #[error("Request frequency too high (code {code}): {message}")]
    RateLimited { code: i64, message: String },

    /// Any other non-success response code
    #[error("Backend error {code}: {message}")]
    Api { code: i64, message: String },

    /// Network-level failure (connect, timeout, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Local filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog refused a directory registered by the adapter
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether retrying the same operation may succeed
    ///
    /// Credential failures wait for an external refresh, `NotFound` will not
    /// change by itself, and cancellation is final. Of the API errors only
    /// server-side (5xx) codes are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited { .. }
            | BackendError::Transport(_)
            | BackendError::InvalidResponse(_) => true,
            BackendError::Api { code, .. } => (500..600).contains(code),
            BackendError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            BackendError::NotFound(_)
            | BackendError::CredentialInvalid { .. }
            | BackendError::Catalog(_)
            | BackendError::Cancelled => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BackendError::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}
