//! Engine tuning

use std::time::Duration;

use crate::remote::RetryPolicy;

/// Tuning knobs for one running engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum reconciliations running at once
    pub max_workers: usize,
    /// Quiet period before a burst of modifications is dispatched
    pub debounce: Duration,
    /// How long a removal waits for a matching creation to become a rename
    pub rename_window: Duration,
    /// How often a dirty manifest is persisted while watching
    pub flush_interval: Duration,
    /// Retry schedule for remote calls
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            debounce: Duration::from_millis(500),
            rename_window: Duration::from_millis(300),
            flush_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineOptions {
    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}
