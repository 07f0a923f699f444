//! # Global scheduler configuration.
//!
//! Provides [`Config`] centralized settings for the worker pool.
//!
//! Config is used in two ways:
//! 1. **Pool creation**: `WorkerPool::builder(config)`
//! 2. **Task defaults**: `Task::builder(id, payload).with_defaults(&config)`
//!
//! It can be built in code (all fields are public, start from `Default`) or
//! from the environment with [`Config::from_env`].
//!
//! ## Sentinel values
//! - `pool_size = 0` → clamped to 1 (a pool always has at least one worker)
//! - `bus_capacity = 0` → clamped to 1

use std::env;
use std::time::Duration;

use crate::policies::BackoffPolicy;
use crate::queue::QueueMode;

/// Load a `.env` file if present (silently ignores a missing file).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env_opt(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Global configuration for the worker pool.
///
/// ## Field semantics
/// - `pool_size`: number of worker slots, the only concurrency bound
/// - `queue_capacity`: maximum number of pending tasks
/// - `queue_mode`: dequeue ordering (priority, or plain FIFO/LIFO)
/// - `max_retries`: default retry budget (MaxRetryCount) for tasks
/// - `retry_interval`: pause before re-enqueueing a failed task
/// - `timeout`: default per-task budget
/// - `reclaim_grace`: how long a cancelled attempt may take to exit before its slot is force-reclaimed
/// - `poll_interval`: how long the dispatch loop idles on an empty queue before re-checking
/// - `shutdown_grace`: how long shutdown waits for in-flight work
/// - `bus_capacity`: event bus ring buffer size
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of concurrent workers.
    pub pool_size: usize,

    /// Capacity of the pending queue. Submissions beyond it fail with `QueueFull`.
    pub queue_capacity: usize,

    /// Ordering of the pending queue.
    pub queue_mode: QueueMode,

    /// Default MaxRetryCount for tasks built with [`Config`] defaults.
    pub max_retries: u32,

    /// RetryInterval: delay between a failure and the re-enqueue.
    ///
    /// Used as `first` of [`Config::backoff`]; the default backoff keeps it constant.
    pub retry_interval: Duration,

    /// Default per-task timeout budget.
    pub timeout: Duration,

    /// Grace period between cancelling an attempt and force-reclaiming its slot.
    pub reclaim_grace: Duration,

    /// Idle wait of the dispatch loop when the queue is empty.
    ///
    /// Submissions wake the loop earlier; this is the upper bound between checks.
    pub poll_interval: Duration,

    /// Maximum time shutdown waits for in-flight work.
    pub shutdown_grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Builds a config from `SCRIPTVISOR_*` environment variables.
    ///
    /// Call [`load_dotenv`] first to pick up a `.env` file. Missing or
    /// unparseable values fall back to [`Config::default`].
    ///
    /// | variable | field |
    /// |----------|-------|
    /// | `SCRIPTVISOR_POOL_SIZE` | `pool_size` |
    /// | `SCRIPTVISOR_QUEUE_CAPACITY` | `queue_capacity` |
    /// | `SCRIPTVISOR_QUEUE_MODE` | `queue_mode` (`priority`, `fifo`, `lifo`) |
    /// | `SCRIPTVISOR_MAX_RETRIES` | `max_retries` |
    /// | `SCRIPTVISOR_RETRY_INTERVAL_MS` | `retry_interval` |
    /// | `SCRIPTVISOR_TIMEOUT_MS` | `timeout` |
    /// | `SCRIPTVISOR_RECLAIM_GRACE_MS` | `reclaim_grace` |
    /// | `SCRIPTVISOR_POLL_INTERVAL_MS` | `poll_interval` |
    /// | `SCRIPTVISOR_SHUTDOWN_GRACE_MS` | `shutdown_grace` |
    /// | `SCRIPTVISOR_BUS_CAPACITY` | `bus_capacity` |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            pool_size: env_parse("SCRIPTVISOR_POOL_SIZE", d.pool_size),
            queue_capacity: env_parse("SCRIPTVISOR_QUEUE_CAPACITY", d.queue_capacity),
            queue_mode: env_parse("SCRIPTVISOR_QUEUE_MODE", d.queue_mode),
            max_retries: env_parse("SCRIPTVISOR_MAX_RETRIES", d.max_retries),
            retry_interval: env_millis("SCRIPTVISOR_RETRY_INTERVAL_MS", d.retry_interval),
            timeout: env_millis("SCRIPTVISOR_TIMEOUT_MS", d.timeout),
            reclaim_grace: env_millis("SCRIPTVISOR_RECLAIM_GRACE_MS", d.reclaim_grace),
            poll_interval: env_millis("SCRIPTVISOR_POLL_INTERVAL_MS", d.poll_interval),
            shutdown_grace: env_millis("SCRIPTVISOR_SHUTDOWN_GRACE_MS", d.shutdown_grace),
            bus_capacity: env_parse("SCRIPTVISOR_BUS_CAPACITY", d.bus_capacity),
        }
    }

    /// Returns the number of worker slots, clamped to a minimum of 1.
    #[inline]
    pub fn pool_size_clamped(&self) -> usize {
        self.pool_size.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Backoff used between a failure and its re-enqueue.
    ///
    /// Constant at `retry_interval` (factor 1.0, no jitter).
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.retry_interval,
            max: self.retry_interval.max(BackoffPolicy::default().max),
            ..BackoffPolicy::default()
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `pool_size = 4`
    /// - `queue_capacity = 1024`
    /// - `queue_mode = QueueMode::Priority`
    /// - `max_retries = 3`
    /// - `retry_interval = 1s`
    /// - `timeout = 30s`
    /// - `reclaim_grace = 2s`
    /// - `poll_interval = 50ms`
    /// - `shutdown_grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 1024,
            queue_mode: QueueMode::Priority,
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            reclaim_grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}
