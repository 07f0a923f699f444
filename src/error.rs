//! Error types used by the scheduler and its collaborators.
//!
//! One enum per component, so a caller can tell at the type level which layer
//! rejected an operation:
//!
//! - [`QueueError`]: the pending-task queue ([`PriorityQueue`](crate::PriorityQueue)).
//! - [`TimeoutError`]: deadline bookkeeping ([`TimeoutController`](crate::TimeoutController)).
//! - [`RetryError`]: terminal retry decisions ([`RetryPolicy`](crate::RetryPolicy)).
//! - [`RunError`]: the script-runner boundary; this is the failure classification.
//! - [`SubmitError`]: admission into the pool.
//! - [`RecoveryError`]: the recovery snapshot store.
//! - [`RuntimeError`]: the pool lifecycle itself.
//!
//! Every enum provides `as_label` (stable snake_case, for logs and events).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the pending-task queue.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds `capacity` tasks.
    #[error("queue full (capacity {capacity})")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// No task is queued.
    #[error("queue empty")]
    Empty,

    /// No queued task has this identity.
    #[error("task {id} not found")]
    NotFound {
        /// Requested identity.
        id: String,
    },
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Full { .. } => "queue_full",
            QueueError::Empty => "queue_empty",
            QueueError::NotFound { .. } => "queue_not_found",
        }
    }
}

/// # Errors produced by the timeout controller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    /// Nothing is armed for the identity: it was never armed, or it was
    /// already cleared or expired.
    #[error("no timeout set for task {id}")]
    NoTimeoutSet {
        /// Requested identity.
        id: String,
    },
}

impl TimeoutError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TimeoutError::NoTimeoutSet { .. } => "no_timeout_set",
        }
    }
}

/// # Errors produced by the retry policy.
///
/// Both variants are terminal for the task: the policy did not put it back
/// into the queue.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The identity has used its whole retry budget.
    #[error("task {id} exhausted {attempts} retries; last error: {last_error}")]
    Exhausted {
        /// Task identity.
        id: String,
        /// Retries already performed for this identity.
        attempts: u32,
        /// Error of the attempt that triggered exhaustion.
        last_error: RunError,
    },

    /// The retry was granted but the queue refused the task.
    #[error("task {id} could not be re-enqueued: {source}")]
    Requeue {
        /// Task identity.
        id: String,
        /// Queue rejection.
        #[source]
        source: QueueError,
    },
}

impl RetryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Exhausted { .. } => "retry_exhausted",
            RetryError::Requeue { .. } => "retry_requeue_failed",
        }
    }

    /// Identity of the task the decision was about.
    pub fn task_id(&self) -> &str {
        match self {
            RetryError::Exhausted { id, .. } | RetryError::Requeue { id, .. } => id,
        }
    }
}

/// # Errors produced by a script execution.
///
/// `ExecutionFailed` and `TimedOut` are retryable; `Fatal` and `Canceled` are not.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The script ran and failed (non-zero exit, I/O error while running).
    #[error("execution failed: {error}")]
    ExecutionFailed {
        /// The underlying error message.
        error: String,
    },

    /// The script exceeded its timeout budget.
    #[error("timed out after {timeout:?}")]
    TimedOut {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The environment could not be prepared (interpreter missing, script not stageable).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The attempt was cancelled explicitly or by shutdown.
    #[error("execution cancelled")]
    Canceled,
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::RunError;
    /// use std::time::Duration;
    ///
    /// let err = RunError::TimedOut { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "run_timed_out");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::ExecutionFailed { .. } => "run_failed",
            RunError::TimedOut { .. } => "run_timed_out",
            RunError::Fatal { .. } => "run_fatal",
            RunError::Canceled => "run_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RunError::ExecutionFailed { error } => format!("error: {error}"),
            RunError::TimedOut { timeout } => format!("timeout: {timeout:?}"),
            RunError::Fatal { error } => format!("fatal: {error}"),
            RunError::Canceled => "cancelled".to_string(),
        }
    }

    /// Indicates whether the failure should be handed to the retry policy.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::RunError;
    ///
    /// assert!(RunError::ExecutionFailed { error: "exit 1".into() }.is_retryable());
    /// assert!(!RunError::Fatal { error: "no python".into() }.is_retryable());
    /// assert!(!RunError::Canceled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::ExecutionFailed { .. } | RunError::TimedOut { .. }
        )
    }
}

/// # Errors returned by [`WorkerPool::submit`](crate::WorkerPool::submit).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The pending queue is at capacity; apply backpressure and try later.
    #[error("submission rejected: queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// A task with this identity is already queued or running.
    #[error("task {id} is already queued or running")]
    Duplicate {
        /// Conflicting identity.
        id: String,
    },

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Closed,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::QueueFull { .. } => "submit_queue_full",
            SubmitError::Duplicate { .. } => "submit_duplicate",
            SubmitError::Closed => "submit_closed",
        }
    }
}

/// # Errors produced by the recovery snapshot store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Reading or writing the snapshot failed.
    #[error("recovery snapshot i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot exists but cannot be decoded.
    #[error("recovery snapshot malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RecoveryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RecoveryError::Io(_) => "recovery_io",
            RecoveryError::Malformed(_) => "recovery_malformed",
        }
    }
}

/// # Errors produced by the pool lifecycle.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// `start` was called on a pool whose dispatch loop is already running
    /// (or that was already shut down).
    #[error("dispatch loop already started")]
    AlreadyRunning,

    /// Shutdown grace period was exceeded; some tasks were still running.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Identities still running when the grace period ended.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyRunning => "runtime_already_running",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
