//! # Retry decisions for failed attempts.
//!
//! [`RetryPolicy`] owns one failure counter per task identity. Counters live
//! for the whole history of the identity: they survive re-enqueues and are
//! only dropped by an explicit [`reset`](RetryPolicy::reset).
//!
//! ```text
//! record_failure(task, err)
//!   ├─ counter < task.max_retries ─► counter += 1
//!   │                               publish RetryScheduled
//!   │                               sleep(backoff.next(counter - 1))   (no lock held)
//!   │                               queue.enqueue(task) ─► Ok(retry number)
//!   └─ counter == task.max_retries ─► publish RetryExhausted ─► Err(Exhausted)
//! ```
//!
//! With `max_retries = R` an identity therefore sees R+1 failures in total
//! (the first attempt plus R retries) before the terminal `Exhausted`.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{RetryError, RunError};
use crate::events::{Bus, Event, EventKind};
use crate::queue::PriorityQueue;
use crate::tasks::Task;

use super::backoff::BackoffPolicy;

/// Per-identity retry budget that feeds failed tasks back into the queue.
///
/// ## Example
/// ```rust
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::time::Duration;
/// use scriptvisor::{BackoffPolicy, Payload, PriorityQueue, QueueMode, RetryPolicy, RunError, Task};
///
/// let queue = PriorityQueue::new(8, QueueMode::Priority);
/// let retry = RetryPolicy::new(queue.clone(), BackoffPolicy::constant(Duration::from_millis(1)), None);
/// let task = Task::builder("flaky", Payload::new("exit 1")).with_max_retries(1).build();
/// let err = RunError::ExecutionFailed { error: "exit status 1".into() };
///
/// assert_eq!(retry.record_failure(task.clone(), &err).await, Ok(1));
/// assert_eq!(queue.size().await, 1);
/// assert!(retry.record_failure(task, &err).await.is_err());
/// # });
/// ```
pub struct RetryPolicy {
    queue: PriorityQueue,
    backoff: BackoffPolicy,
    bus: Option<Bus>,
    counters: Mutex<HashMap<String, u32>>,
}

impl RetryPolicy {
    /// Creates a policy that re-enqueues into `queue` after `backoff`.
    pub fn new(queue: PriorityQueue, backoff: BackoffPolicy, bus: Option<Bus>) -> Self {
        Self {
            queue,
            backoff,
            bus,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failed attempt of `task` and either re-enqueues it or gives up.
    ///
    /// Returns the retry number (1-based) on re-enqueue. The backoff pause
    /// happens after the counter lock is released, so other identities and
    /// queue operations proceed during it.
    ///
    /// # Errors
    /// - [`RetryError::Exhausted`] if the identity already used `task.max_retries()` retries
    /// - [`RetryError::Requeue`] if the queue refused the task after the pause
    pub async fn record_failure(&self, mut task: Task, err: &RunError) -> Result<u32, RetryError> {
        let max = task.max_retries();
        let decision = {
            let mut counters = self.counters.lock().await;
            let used = counters.entry(task.id().to_string()).or_insert(0);
            if *used >= max {
                Err(*used)
            } else {
                *used += 1;
                Ok(*used)
            }
        };

        let retry = match decision {
            Ok(retry) => retry,
            Err(attempts) => {
                debug!(task = %task.id(), attempts, error = %err, "retry budget exhausted");
                self.publish(
                    Event::new(EventKind::RetryExhausted)
                        .with_task(task.id_arc())
                        .with_attempt(attempts)
                        .with_reason(err.as_message()),
                );
                return Err(RetryError::Exhausted {
                    id: task.id().to_string(),
                    attempts,
                    last_error: err.clone(),
                });
            }
        };

        let delay = self.backoff.next(retry - 1);
        debug!(task = %task.id(), retry, max, ?delay, error = %err, "retry scheduled");
        self.publish(
            Event::new(EventKind::RetryScheduled)
                .with_task(task.id_arc())
                .with_attempt(retry)
                .with_delay(delay)
                .with_reason(err.as_message()),
        );

        time::sleep(delay).await;

        task.set_remaining_retries(max - retry);
        let id = task.id().to_string();
        self.queue.enqueue(task).await.map_err(|source| {
            warn!(task = %id, error = %source, "re-enqueue refused");
            RetryError::Requeue { id, source }
        })?;
        Ok(retry)
    }

    /// Retries already recorded for `id`.
    pub async fn attempts(&self, id: &str) -> u32 {
        self.counters.lock().await.get(id).copied().unwrap_or(0)
    }

    /// Forgets the counter of `id`, restoring its full budget.
    pub async fn reset(&self, id: &str) {
        self.counters.lock().await.remove(id);
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}
