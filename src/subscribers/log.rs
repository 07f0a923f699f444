//! # Logging subscriber.
//!
//! [`LogWriter`] turns scheduler events into `tracing` records: one line when
//! an attempt starts, one when it ends, plus retry and terminal decisions.
//!
//! ## Output (with the `fmt` subscriber)
//! ```text
//! INFO  task=report attempt=1 timeout_ms=5000 attempt starting
//! WARN  task=report attempt=1 reason="error: exit status 2" attempt failed
//! INFO  task=report attempt=1 delay_ms=1000 retry scheduled
//! INFO  task=report attempt=2 attempt succeeded
//! INFO  task=report outcome=succeeded task completed
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Subscriber that logs lifecycle events through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskSubmitted => {
                debug!(task, priority = ?e.priority, "task submitted");
            }
            EventKind::TaskStarting => {
                info!(task, attempt = ?e.attempt, timeout_ms = ?e.timeout_ms, "attempt starting");
            }
            EventKind::TaskStopped => {
                info!(task, attempt = ?e.attempt, "attempt succeeded");
            }
            EventKind::TaskFailed => {
                warn!(task, attempt = ?e.attempt, reason = ?e.reason, "attempt failed");
            }
            EventKind::TimeoutHit => {
                warn!(task, timeout_ms = ?e.timeout_ms, "timeout hit");
            }
            EventKind::SlotReclaimed => {
                warn!(task, attempt = ?e.attempt, grace_ms = ?e.delay_ms, "slot force-reclaimed");
            }
            EventKind::RetryScheduled => {
                info!(task, attempt = ?e.attempt, delay_ms = ?e.delay_ms, "retry scheduled");
            }
            EventKind::RetryExhausted => {
                warn!(task, retries = ?e.attempt, reason = ?e.reason, "retries exhausted");
            }
            EventKind::TaskCanceled => {
                info!(task, "task canceled");
            }
            EventKind::TaskCompleted => {
                let outcome = e.outcome.map(|o| o.as_label()).unwrap_or("-");
                info!(task, outcome, "task completed");
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all tasks stopped within grace"),
            EventKind::GraceExceeded => warn!("shutdown grace exceeded"),
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                warn!(subscriber = task, reason = ?e.reason, "subscriber issue");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
