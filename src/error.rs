use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

/// Errors produced while probing a single URL.
///
/// Every variant is local to one URL's task; a batch call never fails as a
/// whole because one of its URLs did.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("probe cancelled")]
    Cancelled,

    #[error("request failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected HTTP status {status} {reason} for {url}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("rate limited (HTTP {status}) for {url}, retry after {retry_after:?}")]
    RateLimited {
        url: String,
        status: u16,
        retry_after: Duration,
    },

    #[error("insufficient bytes: got {got}, need at least {min}")]
    InsufficientBytes { got: usize, min: usize },
}

impl ProbeError {
    /// Only rate-limit responses are worth a second attempt; everything
    /// else either failed locally or failed the same way it would again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::RateLimited { .. })
    }

    /// Server-requested wait before the single retry, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProbeError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<AcquireError> for ProbeError {
    fn from(_: AcquireError) -> Self {
        // A closed semaphore only happens during shutdown.
        ProbeError::Cancelled
    }
}
