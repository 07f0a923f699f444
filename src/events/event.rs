//! # Scheduler events emitted by the worker pool.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Queue events**: admission of work
//! - **Attempt events**: one dispatch attempt (starting, stopped, failed, timeout, reclaim)
//! - **Decision events**: retry scheduling and terminal outcomes
//! - **Runtime events**: shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task
//! identity, reasons, and delays.
//!
//! ## Observer mapping
//! ```text
//! started        ─► TaskStarting
//! statusChanged  ─► TaskSubmitted / TaskStopped / TaskFailed / RetryScheduled
//! stopped        ─► TaskCompleted
//! ```
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use scriptvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("nightly-report")
//!     .with_reason("exit status 2")
//!     .with_attempt(3)
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("nightly-report"));
//! assert_eq!(ev.reason.as_deref(), Some("exit status 2"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::tasks::Outcome;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of scheduler events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Queue events ===
    /// Task accepted into the queue by `submit`.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `priority`: task priority
    TaskSubmitted,

    // === Attempt events ===
    /// A worker took the task and is starting an attempt.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: attempt number (1-based, per identity)
    /// - `timeout_ms`: armed budget
    TaskStarting,

    /// Attempt finished successfully.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: attempt number
    /// - `output`: captured output
    TaskStopped,

    /// Attempt failed (runner error, timeout, or cancellation).
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: attempt number
    /// - `reason`: failure message
    TaskFailed,

    /// The attempt's deadline elapsed and its token was cancelled.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `timeout_ms`: budget that was exceeded
    TimeoutHit,

    /// A cancelled attempt did not exit within the grace period; its worker
    /// slot was reclaimed anyway.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: attempt number
    /// - `delay_ms`: grace period that was exceeded
    SlotReclaimed,

    // === Decision events ===
    /// Retry granted; the task is re-enqueued after `delay_ms`.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: retry number (1-based)
    /// - `delay_ms`: backoff before re-enqueue
    /// - `reason`: the failure being retried
    RetryScheduled,

    /// Retry budget exhausted; the task will not run again.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `attempt`: retries performed
    /// - `reason`: last failure
    RetryExhausted,

    /// Task cancelled explicitly (queued or in flight) or by shutdown.
    ///
    /// Sets:
    /// - `task`: task identity
    TaskCanceled,

    /// Terminal outcome of a task; emitted exactly once per submitted task.
    ///
    /// Sets:
    /// - `task`: task identity
    /// - `outcome`: terminal classification
    /// - `attempt`: last attempt number
    /// - `reason`: last error, if any
    TaskCompleted,

    // === Runtime events ===
    /// Shutdown requested.
    ShutdownRequested,

    /// All in-flight work stopped within the shutdown grace period.
    AllStoppedWithin,

    /// Shutdown grace period exceeded; some tasks were still running.
    GraceExceeded,

    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: reason string
    SubscriberOverflow,
}

/// Scheduler event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task identity (or subscriber name for subscriber events).
    pub task: Option<Arc<str>>,
    /// Attempt or retry number.
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Task timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay in milliseconds (backoff, grace).
    pub delay_ms: Option<u32>,
    /// Task priority.
    pub priority: Option<i32>,
    /// Captured output of a successful attempt.
    pub output: Option<Arc<str>>,
    /// Terminal classification (only for `TaskCompleted`).
    pub outcome: Option<Outcome>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            attempt: None,
            reason: None,
            timeout_ms: None,
            delay_ms: None,
            priority: None,
            output: None,
            outcome: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task identity.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(clamp_ms(d));
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(clamp_ms(d));
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[inline]
    pub fn with_output(mut self, output: impl Into<Arc<str>>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[inline]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// True for events about subscribers themselves (never re-emitted to subscribers
    /// by overflow handling, to avoid feedback loops).
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn clamp_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
