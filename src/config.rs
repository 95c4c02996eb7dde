//! Configuration for the dispatch gateway and reconciliation consumer.
//!
//! Both structs are plain data with `Default` impls and `with_*` builders.
//! The library never reads configuration files or environment variables;
//! embedders construct these and hand them to
//! [`DispatchGateway`](crate::gateway::DispatchGateway) and
//! [`ReconciliationConsumer`](crate::reconcile::ReconciliationConsumer).

use std::time::Duration;

/// Configuration for the dispatch gateway.
///
/// # Defaults
///
/// | Setting                    | Default    | Description                         |
/// |----------------------------|------------|-------------------------------------|
/// | `default_timeout_ms`       | 600,000    | 10 min execution bound per task     |
/// | `default_queue_timeout_ms` | 60,000     | 1 min allowed in the queue          |
/// | `max_timeout_ms`           | 86,400,000 | 24 h ceiling on caller-supplied TTL |
///
/// # Examples
///
/// ```
/// use taskmesh::config::DispatchConfig;
///
/// let config = DispatchConfig::default().with_default_timeout_ms(30_000);
/// assert_eq!(config.default_timeout_ms, 30_000);
/// assert_eq!(config.default_queue_timeout_ms, 60_000);
/// ```
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Execution bound applied when a submission carries no timeout.
    pub default_timeout_ms: u64,

    /// Queue-residency bound applied when a submission carries none.
    pub default_queue_timeout_ms: u64,

    /// Ceiling clamped onto caller-supplied timeouts.
    pub max_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 600_000,
            default_queue_timeout_ms: 60_000,
            max_timeout_ms: 86_400_000,
        }
    }
}

impl DispatchConfig {
    /// Sets the default execution timeout.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// Sets the default queue timeout.
    #[must_use]
    pub fn with_default_queue_timeout_ms(mut self, ms: u64) -> Self {
        self.default_queue_timeout_ms = ms;
        self
    }

    /// Clamps `requested` to the configured ceiling, falling back to the
    /// default when absent.
    pub(crate) fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms)
    }

    /// Queue timeout with the default applied.
    pub(crate) fn effective_queue_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_queue_timeout_ms)
            .min(self.max_timeout_ms)
    }
}

/// Configuration for the reconciliation consumer.
///
/// Every distributed-lock acquisition carries the explicit `lock_wait` and
/// `lock_hold` ceilings from here; an acquisition must never block
/// indefinitely.
///
/// # Defaults
///
/// | Setting                   | Default | Description                               |
/// |---------------------------|---------|-------------------------------------------|
/// | `lock_wait`               | 10 s    | How long to wait for a contested lock     |
/// | `lock_hold`               | 60 s    | How long an acquired lock may be held     |
/// | `max_lock_attempts`       | 3       | Total acquire attempts on the create path |
/// | `initial_release_ttl_ms`  | 600,000 | Watermark for a release never yet reported |
///
/// # Examples
///
/// ```
/// use taskmesh::config::ReconcileConfig;
///
/// let config = ReconcileConfig::default();
/// assert_eq!(config.max_lock_attempts, 3);
/// assert_eq!(config.lock_wait.as_secs(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Wait ceiling passed to every lock acquisition.
    pub lock_wait: Duration,

    /// Hold ceiling passed to every lock acquisition.
    pub lock_hold: Duration,

    /// Total acquire attempts on the tracked-event creation path. The
    /// report-processing path never retries within a cycle.
    pub max_lock_attempts: u32,

    /// Delete-after watermark assigned to a release identifier that has
    /// been registered but never appeared in a report yet.
    pub initial_release_ttl_ms: u64,

    /// Interval for the perpetual tasks the consumer creates.
    pub sync_interval_ms: u64,

    /// Per-run timeout for the perpetual tasks the consumer creates.
    pub sync_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            lock_hold: Duration::from_secs(60),
            max_lock_attempts: 3,
            initial_release_ttl_ms: 600_000,
            sync_interval_ms: 600_000,
            sync_timeout_ms: 120_000,
        }
    }
}

impl ReconcileConfig {
    /// Sets the lock wait ceiling.
    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the lock hold ceiling.
    #[must_use]
    pub fn with_lock_hold(mut self, hold: Duration) -> Self {
        self.lock_hold = hold;
        self
    }

    /// Sets the creation-path lock attempt budget.
    #[must_use]
    pub fn with_max_lock_attempts(mut self, attempts: u32) -> Self {
        self.max_lock_attempts = attempts;
        self
    }
}
