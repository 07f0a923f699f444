//! # Attempt results and terminal completions.
//!
//! Every dispatch attempt yields one [`TaskResult`]. When a task reaches a
//! terminal state the pool sends exactly one [`Completion`] to the channel
//! registered with [`WorkerPoolBuilder::with_completions`](crate::WorkerPoolBuilder::with_completions).
//!
//! ```text
//! attempt ok                      ─► Completion { outcome: Succeeded }
//! attempt err, retryable, budget  ─► RetryPolicy re-enqueues (no completion yet)
//! attempt err, retryable, no budget ─► Completion { outcome: Exhausted }
//! attempt err, non-retryable      ─► Completion { outcome: Rejected }
//! cancel / shutdown               ─► Completion { outcome: Canceled }
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::RunError;

/// Result of one dispatch attempt.
#[derive(Clone, Debug)]
pub struct TaskResult {
    /// Task identity.
    pub task_id: Arc<str>,
    /// Captured output (empty on failure).
    pub output: String,
    /// `None` on success.
    pub error: Option<RunError>,
    /// When the attempt started.
    pub started_at: SystemTime,
    /// When the attempt ended.
    pub finished_at: SystemTime,
    /// Attempt number for this identity (1-based).
    pub attempt: u32,
}

impl TaskResult {
    /// `true` when the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wall-clock duration of the attempt.
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    /// Result for a task that terminated without running (e.g. cancelled while queued).
    pub(crate) fn not_run(task_id: Arc<str>, error: RunError) -> Self {
        let now = SystemTime::now();
        Self {
            task_id,
            output: String::new(),
            error: Some(error),
            started_at: now,
            finished_at: now,
            attempt: 0,
        }
    }
}

/// Terminal classification of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The last attempt succeeded.
    Succeeded,
    /// Every allowed attempt failed.
    Exhausted,
    /// Failed with a non-retryable error, or could not be re-enqueued.
    Rejected,
    /// Cancelled explicitly or by shutdown.
    Canceled,
}

impl Outcome {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Exhausted => "exhausted",
            Outcome::Rejected => "rejected",
            Outcome::Canceled => "canceled",
        }
    }
}

/// Terminal report for a submitted task.
#[derive(Clone, Debug)]
pub struct Completion {
    /// Result of the last attempt.
    pub result: TaskResult,
    /// Terminal classification.
    pub outcome: Outcome,
}

impl Completion {
    /// Task identity.
    pub fn task_id(&self) -> &str {
        &self.result.task_id
    }
}
