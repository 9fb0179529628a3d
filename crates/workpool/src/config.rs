//! Pool configuration
//!
//! Builder-style configuration for [`WorkerPool`](crate::WorkerPool), loadable
//! from environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::BackpressureConfig;

/// Default per-task timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default health-check period
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(5_000);

/// Default grace period granted to a worker when it is terminated
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// How the manager picks a slot for a new task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// `slot = task_id mod worker_count`; ignores worker load
    #[default]
    TaskId,
    /// Slot with the fewest pending tasks, lowest index on ties
    LeastPending,
}

impl RoutingStrategy {
    /// Parse a strategy name as used in `WORKPOOL_ROUTING`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "task_id" | "modulo" | "round_robin" => Some(Self::TaskId),
            "least_pending" | "least" => Some(Self::LeastPending),
            _ => None,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots
    pub worker_count: usize,

    /// Time a task may stay unresolved before it fails with a timeout
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Period of the health-check broadcast
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Grace period when terminating a worker
    #[serde(with = "duration_millis")]
    pub terminate_timeout: Duration,

    /// Slot selection rule
    pub routing: RoutingStrategy,

    /// Bound on the pending task table
    pub backpressure: BackpressureConfig,

    /// Fail tasks pending on a slot as soon as its worker is replaced,
    /// instead of letting them run into their timeout
    pub fail_in_flight_on_crash: bool,

    /// Replace a worker after this many consecutive unanswered health checks
    pub max_missed_health_checks: Option<u32>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            routing: RoutingStrategy::default(),
            backpressure: BackpressureConfig::default(),
            fail_in_flight_on_crash: false,
            max_missed_health_checks: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKPOOL_WORKER_COUNT`: Number of workers (default: available parallelism)
    /// - `WORKPOOL_TASK_TIMEOUT_MS`: Per-task timeout (default: 30000)
    /// - `WORKPOOL_HEALTH_CHECK_INTERVAL_MS`: Health-check period (default: 5000)
    /// - `WORKPOOL_TERMINATE_TIMEOUT_MS`: Termination grace period (default: 5000)
    /// - `WORKPOOL_ROUTING`: `task_id` or `least_pending` (default: task_id)
    /// - `WORKPOOL_MAX_PENDING`: Bound on pending tasks (default: unbounded)
    /// - `WORKPOOL_FAIL_IN_FLIGHT_ON_CRASH`: `true`/`1` to fail orphaned tasks at once
    /// - `WORKPOOL_MAX_MISSED_HEALTH_CHECKS`: Replace silent workers (default: never)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let worker_count = lookup("WORKPOOL_WORKER_COUNT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.worker_count);

        let routing = lookup("WORKPOOL_ROUTING")
            .and_then(|v| RoutingStrategy::parse(&v))
            .unwrap_or(defaults.routing);

        let mut backpressure = defaults.backpressure.clone();
        if let Some(max) = lookup("WORKPOOL_MAX_PENDING").and_then(|v| v.parse().ok()) {
            backpressure = backpressure.with_max_pending(max);
        }

        let fail_in_flight_on_crash = lookup("WORKPOOL_FAIL_IN_FLIGHT_ON_CRASH")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.fail_in_flight_on_crash);

        let max_missed_health_checks = lookup("WORKPOOL_MAX_MISSED_HEALTH_CHECKS")
            .and_then(|v| v.parse().ok())
            .or(defaults.max_missed_health_checks);

        Self {
            worker_count,
            task_timeout: millis("WORKPOOL_TASK_TIMEOUT_MS", defaults.task_timeout),
            health_check_interval: millis(
                "WORKPOOL_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval,
            ),
            terminate_timeout: millis("WORKPOOL_TERMINATE_TIMEOUT_MS", defaults.terminate_timeout),
            routing,
            backpressure,
            fail_in_flight_on_crash,
            max_missed_health_checks,
        }
    }

    /// Set the number of workers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the per-task timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the health-check period
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the termination grace period
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Set the routing strategy
    pub fn with_routing(mut self, routing: RoutingStrategy) -> Self {
        self.routing = routing;
        self
    }

    /// Set backpressure configuration
    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    /// Fail pending tasks of a slot when its worker is replaced
    pub fn with_fail_in_flight_on_crash(mut self, enabled: bool) -> Self {
        self.fail_in_flight_on_crash = enabled;
        self
    }

    /// Replace workers that miss this many health checks in a row
    pub fn with_max_missed_health_checks(mut self, misses: u32) -> Self {
        self.max_missed_health_checks = Some(misses);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("worker_count", "must be at least 1"));
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::invalid("task_timeout", "must be positive"));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::invalid(
                "health_check_interval",
                "must be positive",
            ));
        }
        if self.max_missed_health_checks == Some(0) {
            return Err(ConfigError::invalid(
                "max_missed_health_checks",
                "must be at least 1 when set",
            ));
        }
        self.backpressure
            .validate()
            .map_err(|e| ConfigError::invalid("backpressure", e.to_string()))
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
