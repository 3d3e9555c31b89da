//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// ID of the signed-in user (owner of the personal library).
    pub user_id: u64,
    /// Base URL of the web API (e.g., "https://api.example.org").
    ///
    /// Failures of requests outside this URL are attributed to file storage.
    pub api_base_url: String,
    /// Number of libraries processed concurrently.
    pub worker_count: usize,
    /// Maximum number of objects per write request.
    pub batch_size: usize,
    /// Restart policy for runs that hit a remote version change.
    pub retry: RetryConfig,
    /// Timeout applied to each HTTP request.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(user_id: u64, api_base_url: impl Into<String>) -> Self {
        Self {
            user_id,
            api_base_url: api_base_url.into(),
            worker_count: 4,
            batch_size: 50,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the number of concurrent library workers (at least one).
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Sets the write batch size (at least one).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the restart policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(0, "")
    }
}

/// How often and how patiently a run restarts after the server's library
/// version moved underneath it.
///
/// Attempt 0 starts at once. Attempt `n` waits `restart_delay` doubled
/// `n - 1` times, never longer than `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts per run, the first one included.
    pub max_attempts: u32,
    /// Wait before the first restart.
    pub restart_delay: Duration,
    /// Upper bound for any wait.
    pub max_delay: Duration,
    /// Adds up to a quarter of the wait at random.
    pub jitter: bool,
}

impl RetryConfig {
    /// Allows `max_attempts` attempts per run.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            restart_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            jitter: true,
        }
    }

    /// A run that never restarts; a version change aborts it.
    pub fn single_attempt() -> Self {
        Self::new(1)
    }

    /// Sets the wait before the first restart.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Caps every wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables random jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if the run may restart after `attempt` (0-indexed).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Wait before `attempt` (0-indexed) starts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        let delay = self.restart_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
