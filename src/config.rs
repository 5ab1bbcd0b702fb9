//! Probe options and per-URL results.
//!
//! This module provides the configuration knobs for the probing engine and
//! the result record written into each output slot.

use crate::{ImageInfo, ProbeError};
use serde::{Deserialize, Serialize};

/// Default per-origin concurrency once range support has been observed.
pub const CONCURRENT_REQUESTS_REUSABLE_DEFAULT: usize = 20;

/// Default per-origin concurrency before range support has been observed.
pub const CONCURRENT_REQUESTS_NON_REUSABLE_DEFAULT: usize = 5;

/// Default global concurrency cap across all origins.
pub const MAX_CONCURRENT_CONNECTIONS_DEFAULT: usize = 50;

/// Concurrency configuration for a batch probe.
///
/// A value of zero means "use the default". After normalization the
/// reusable limit is always at least the non-reusable limit.
///
/// # Examples
///
/// ```rust
/// use image_probe::ProbeOptions;
///
/// // Defaults: 20 reusable / 5 non-reusable per origin, 50 global.
/// let options = ProbeOptions::default();
///
/// // Override just the global cap.
/// let options = ProbeOptions {
///     max_concurrent_connections: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeOptions {
    /// Per-origin limit once the origin has answered a range request with
    /// 206 Partial Content (connections are cheap to reuse).
    pub concurrent_requests_reusable: usize,

    /// Per-origin limit while range support is still unknown. Kept low so
    /// an origin that ships full bodies is not hammered.
    pub concurrent_requests_non_reusable: usize,

    /// Global cap on in-flight probes across every origin in the batch.
    pub max_concurrent_connections: usize,

    /// Custom User-Agent for the per-origin clients (default: reqwest's).
    pub user_agent: Option<String>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            concurrent_requests_reusable: CONCURRENT_REQUESTS_REUSABLE_DEFAULT,
            concurrent_requests_non_reusable: CONCURRENT_REQUESTS_NON_REUSABLE_DEFAULT,
            max_concurrent_connections: MAX_CONCURRENT_CONNECTIONS_DEFAULT,
            user_agent: None,
        }
    }
}

impl ProbeOptions {
    /// Applies defaults to zeroed fields and restores the
    /// reusable >= non-reusable invariant.
    pub fn normalized(mut self) -> Self {
        if self.concurrent_requests_reusable < 1 {
            self.concurrent_requests_reusable = CONCURRENT_REQUESTS_REUSABLE_DEFAULT;
        }
        if self.concurrent_requests_non_reusable < 1 {
            self.concurrent_requests_non_reusable = CONCURRENT_REQUESTS_NON_REUSABLE_DEFAULT;
        }
        if self.max_concurrent_connections < 1 {
            self.max_concurrent_connections = MAX_CONCURRENT_CONNECTIONS_DEFAULT;
        }
        if self.concurrent_requests_reusable < self.concurrent_requests_non_reusable {
            self.concurrent_requests_reusable = self.concurrent_requests_non_reusable;
        }
        self
    }
}

/// Outcome of probing one URL.
///
/// Produced exactly once per input URL, at the output index matching that
/// URL's input index. `info` is the zero value when the probe failed.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub info: ImageInfo,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub(crate) fn pending(url: &str) -> Self {
        Self {
            url: url.to_string(),
            info: ImageInfo::default(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
