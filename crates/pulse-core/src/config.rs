use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the fleet monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between the end of one sweep and the start of the next (default: 7000 ms).
    pub poll_interval: Duration,
    /// Sliding window used for recent-issue classification (default: 12 min).
    pub recent_window: Duration,
    /// Default per-stream staleness threshold, applied when seeding records (default: 7000 ms).
    pub stale_threshold: Duration,
    /// Maximum concurrent external analysis jobs, process-wide (default: 4).
    pub max_concurrent_analysis: usize,
    /// Ledger entries older than this are dropped on persist (default: 7 days).
    pub error_retention: Duration,
    /// HTTP request timeout for manifest fetches (default: 10 s).
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(7000),
            recent_window: Duration::from_secs(12 * 60),
            stale_threshold: Duration::from_millis(7000),
            max_concurrent_analysis: 4,
            error_retention: Duration::from_secs(7 * 24 * 60 * 60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_recent_window(mut self, secs: u64) -> Self {
        self.recent_window = Duration::from_secs(secs);
        self
    }

    pub fn with_stale_threshold(mut self, ms: u64) -> Self {
        self.stale_threshold = Duration::from_millis(ms);
        self
    }

    pub fn with_max_concurrent_analysis(mut self, max: usize) -> Self {
        self.max_concurrent_analysis = max.max(1);
        self
    }

    pub fn with_error_retention(mut self, secs: u64) -> Self {
        self.error_retention = Duration::from_secs(secs);
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }
}
