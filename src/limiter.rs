//! Admission control for concurrent probes.
//!
//! Two gates compose per task: a global semaphore shared by every origin,
//! and a per-origin two-tier limiter that starts at the conservative
//! non-reusable limit and widens to the reusable limit once the origin has
//! proven it serves partial content.

use crate::ProbeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Per-origin admission limiter.
///
/// The base tier is always available. The extra tier
/// (`reusable - non_reusable` permits) only becomes eligible after any
/// response from this origin carried HTTP 206. The flag is monotonic and
/// read with a plain atomic load on every acquisition. Requests racing the
/// first 206 may still take the narrow path; serializing acquisitions to
/// close that window would bottleneck the hot path.
pub struct OriginLimiter {
    base: Arc<Semaphore>,
    extra: Option<Arc<Semaphore>>,
    range_supported: AtomicBool,
}

/// Permit for one in-flight probe against an origin. Held across the whole
/// retry sequence; dropping it releases the slot.
pub struct OriginPermit {
    _permit: OwnedSemaphorePermit,
}

impl OriginLimiter {
    pub fn new(non_reusable_limit: usize, reusable_limit: usize) -> Self {
        let non_reusable_limit = non_reusable_limit.max(1);
        let reusable_limit = reusable_limit.max(non_reusable_limit);
        let extra = reusable_limit - non_reusable_limit;

        Self {
            base: Arc::new(Semaphore::new(non_reusable_limit)),
            extra: (extra > 0).then(|| Arc::new(Semaphore::new(extra))),
            range_supported: AtomicBool::new(false),
        }
    }

    /// Records that this origin answered a range request with 206.
    /// Idempotent; never reset for the lifetime of the origin.
    pub fn mark_range_supported(&self) {
        self.range_supported.store(true, Ordering::Relaxed);
    }

    pub fn range_supported(&self) -> bool {
        self.range_supported.load(Ordering::Relaxed)
    }

    /// Waits for an admission slot, racing cancellation.
    ///
    /// With range support confirmed both tiers are raced and whichever
    /// frees up first wins; before that only the base tier is eligible.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OriginPermit, ProbeError> {
        if self.range_supported() {
            if let Some(extra) = &self.extra {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                    permit = self.base.clone().acquire_owned() => permit?,
                    permit = extra.clone().acquire_owned() => permit?,
                };
                return Ok(OriginPermit { _permit: permit });
            }
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            permit = self.base.clone().acquire_owned() => permit?,
        };
        Ok(OriginPermit { _permit: permit })
    }
}

/// Acquires a slot on the batch-wide connection gate, racing cancellation.
pub async fn acquire_global(
    global: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<OwnedSemaphorePermit, ProbeError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        permit = global.clone().acquire_owned() => Ok(permit?),
    }
}
