use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Live completion counters for a batch, safe to poll from a reporter
/// task while probe tasks record into it.
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs() > 0 {
            completed as f64 / elapsed.as_secs() as f64
        } else {
            0.0
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed - errors,
            elapsed,
            rate,
            eta: (completed > 0 && rate > 0.0).then(|| {
                let remaining = self.total - completed;
                Duration::from_secs((remaining as f64 / rate) as u64)
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}
