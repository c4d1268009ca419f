//! Server throttling accounting for the job node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Warning emitted the first time the server throttles the job.
pub const THROTTLING_WARNING: &str = "The job is currently being throttled by the server. \
You may experience delays in console line output, job status reporting, and action log uploads.";

/// Accumulates throttling delay reported by the job server queue.
#[derive(Debug, Default)]
pub struct ThrottlingMonitor {
    total_ms: AtomicU64,
    reported: AtomicBool,
}

impl ThrottlingMonitor {
    /// Create a monitor with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reported delay.
    ///
    /// Returns true only for the first notification, which is the one that
    /// should be surfaced as a warning.
    pub fn record(&self, delay: Duration) -> bool {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .total_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                Some(total.saturating_add(millis))
            });
        !self.reported.swap(true, Ordering::SeqCst)
    }

    /// Total delay recorded so far.
    pub fn total_delay(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::SeqCst))
    }

    /// Summary line for job completion, if any delay was recorded.
    pub fn summary(&self) -> Option<String> {
        let total = self.total_delay();
        if total.is_zero() {
            return None;
        }
        Some(format!(
            "The job has experienced {} seconds total delay caused by server throttling.",
            total.as_secs_f64()
        ))
    }
}
