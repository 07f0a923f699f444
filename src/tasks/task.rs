//! # Schedulable unit of work.
//!
//! A [`Task`] wraps one script execution. It is plain data: the pool owns the
//! behavior (dispatch, deadlines, retries) and the [`ScriptRunner`](crate::ScriptRunner)
//! owns the execution. Cloning a task is cheap (identity and payload are shared).
//!
//! Everything about a task is fixed at construction except the remaining-retry
//! counter, which only the [`RetryPolicy`](crate::RetryPolicy) lowers.

use std::sync::Arc;
use std::time::Duration;

use super::builder::TaskBuilder;

/// Script text plus argument list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Script source handed to the runner.
    pub script: String,
    /// Arguments appended after the script path.
    pub args: Vec<String>,
}

impl Payload {
    /// Creates a payload without arguments.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            args: Vec::new(),
        }
    }

    /// Returns the payload with `args` replacing the current arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A unit of work scheduled by the pool.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use scriptvisor::{Payload, Task};
///
/// let task = Task::builder("report-42", Payload::new("print('hi')"))
///     .with_priority(5)
///     .with_timeout(Duration::from_secs(10))
///     .with_max_retries(2)
///     .build();
///
/// assert_eq!(task.id(), "report-42");
/// assert_eq!(task.priority(), 5);
/// assert_eq!(task.remaining_retries(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct Task {
    id: Arc<str>,
    payload: Arc<Payload>,
    priority: i32,
    timeout: Duration,
    max_retries: u32,
    remaining_retries: u32,
}

impl Task {
    /// Creates a task with explicit parameters.
    ///
    /// ### Parameters
    /// - `id`: identity, unique for the lifetime of the scheduler
    /// - `payload`: script and arguments
    /// - `priority`: higher runs first
    /// - `timeout`: per-attempt budget
    /// - `max_retries`: MaxRetryCount for this identity
    pub fn new(
        id: impl Into<Arc<str>>,
        payload: Payload,
        priority: i32,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            payload: Arc::new(payload),
            priority,
            timeout,
            max_retries,
            remaining_retries: max_retries,
        }
    }

    /// Creates a builder for constructing a task with a fluent API.
    pub fn builder(id: impl Into<Arc<str>>, payload: Payload) -> TaskBuilder {
        TaskBuilder::new(id, payload)
    }

    /// Task identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the identity (cheap to clone into events).
    pub fn id_arc(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// Script and arguments.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Dispatch priority (higher = more urgent).
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Per-attempt timeout budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// MaxRetryCount for this identity.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retries still available.
    pub fn remaining_retries(&self) -> u32 {
        self.remaining_retries
    }

    pub(crate) fn set_remaining_retries(&mut self, remaining: u32) {
        self.remaining_retries = remaining;
    }
}
