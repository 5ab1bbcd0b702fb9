use metrics::{Counter, Histogram};
use std::time::Duration;

/// Probe counters and timings on the `metrics` facade.
///
/// Handles default to noop so the engine stays zero-cost when no recorder
/// is installed; embedders that install one can swap in real handles.
pub struct ProbeMetrics {
    pub probes_completed: Counter,
    pub probes_failed: Counter,
    pub probe_duration: Histogram,
    pub range_requests: Counter,
    pub rate_limit_retries: Counter,
    pub bytes_read: Counter,
}

impl ProbeMetrics {
    pub fn new() -> Self {
        Self {
            probes_completed: Counter::noop(),
            probes_failed: Counter::noop(),
            probe_duration: Histogram::noop(),
            range_requests: Counter::noop(),
            rate_limit_retries: Counter::noop(),
            bytes_read: Counter::noop(),
        }
    }

    pub fn record_probe(&self, duration: Duration, success: bool) {
        if success {
            self.probes_completed.increment(1);
        } else {
            self.probes_failed.increment(1);
        }
        self.probe_duration.record(duration.as_secs_f64());
    }

    pub fn record_range_request(&self) {
        self.range_requests.increment(1);
    }

    pub fn record_retry(&self) {
        self.rate_limit_retries.increment(1);
    }

    pub fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.increment(bytes);
    }
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
