//! Configuration for recovery.

use crate::error::{RecoveryError, RecoveryResult};
use std::time::Duration;

/// Configuration for a recovery master.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Fetches in flight at once.
    pub max_concurrent_fetches: usize,
    /// Threads issuing fetches.
    pub worker_threads: usize,
    /// Delay before asking a not-ready backup again.
    pub retry_delay: Duration,
    /// How long one fetch attempt may go unanswered.
    pub fetch_timeout: Duration,
    /// Replay bytes between calls that let replication make progress.
    pub progress_interval_bytes: usize,
    /// Sleep between polling passes that made no progress.
    pub poll_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            worker_threads: 4,
            retry_delay: Duration::from_millis(1),
            fetch_timeout: Duration::from_secs(10),
            progress_interval_bytes: 50_000,
            poll_interval: Duration::from_micros(50),
        }
    }
}

impl RecoveryConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent fetches.
    pub fn with_max_concurrent_fetches(mut self, count: usize) -> Self {
        self.max_concurrent_fetches = count;
        self
    }

    /// Sets the number of fetch worker threads.
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Sets the not-ready retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the per-attempt fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets how many replayed bytes pass between replication progress calls.
    pub fn with_progress_interval_bytes(mut self, bytes: usize) -> Self {
        self.progress_interval_bytes = bytes;
        self
    }

    /// Sets the idle polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(RecoveryError::invalid_config(
                "max_concurrent_fetches must be at least 1",
            ));
        }
        if self.worker_threads == 0 {
            return Err(RecoveryError::invalid_config(
                "worker_threads must be at least 1",
            ));
        }
        if self.progress_interval_bytes == 0 {
            return Err(RecoveryError::invalid_config(
                "progress_interval_bytes must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.retry_delay, Duration::from_millis(1));
        assert_eq!(config.progress_interval_bytes, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = RecoveryConfig::new()
            .with_max_concurrent_fetches(2)
            .with_worker_threads(3)
            .with_retry_delay(Duration::from_millis(5))
            .with_fetch_timeout(Duration::from_secs(1))
            .with_progress_interval_bytes(1000);
        assert_eq!(config.max_concurrent_fetches, 2);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
        assert_eq!(config.progress_interval_bytes, 1000);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = RecoveryConfig::new().with_max_concurrent_fetches(0);
        assert!(matches!(
            config.validate(),
            Err(RecoveryError::InvalidConfig { .. })
        ));
    }
}
