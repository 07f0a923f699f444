//! # One dispatched task, from slot to decision.
//!
//! [`run_task`] owns a dequeued task together with its worker slot and drives
//! exactly one attempt, then routes the result.
//!
//! ## Flow
//! ```text
//! run_task(task, permit, cancel)
//!   ├─ cancel already fired ─► finish(Canceled)
//!   ├─ publish TaskStarting
//!   ├─ TimeoutController::arm_child(id, task.timeout, cancel) ─► token
//!   ├─ select!
//!   │    ├─ runner.execute(payload, timeout, token) finished ─► result
//!   │    └─ token cancelled (deadline / cancel / shutdown)
//!   │          └─ wait up to reclaim_grace for the runner
//!   │               └─ still running: drop it, publish SlotReclaimed
//!   ├─ clear deadline, release slot
//!   └─ route:
//!        Ok                          ─► TaskStopped ─► finish(Succeeded)
//!        Err(retryable)              ─► TaskFailed  ─► RetryPolicy::record_failure
//!                                                        ├─ Ok: back in the queue
//!                                                        ├─ Exhausted ─► finish(Exhausted)
//!                                                        └─ Requeue   ─► finish(Rejected)
//!        Err(Fatal)                  ─► TaskFailed  ─► finish(Rejected)
//!        Err(Canceled)               ─► TaskFailed  ─► finish(Canceled)
//! ```
//!
//! ## Rules
//! - The slot is released before the retry backoff starts
//! - Any result observed after `cancel` fired is `Canceled` (never retried)
//! - Any result observed after the deadline fired is `TimedOut`, even a late `Ok`
//! - `finish` removes the identity from the live table first, so each task
//!   completes exactly once

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{RetryError, RunError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::RetryPolicy;
use crate::queue::PriorityQueue;
use crate::runner::RunnerRef;
use crate::tasks::{Completion, Outcome, Task, TaskResult};
use crate::timeout::TimeoutController;

/// State shared by the pool handle, the dispatch loop and every worker.
pub(super) struct Shared {
    pub cfg: Config,
    pub bus: Bus,
    pub queue: PriorityQueue,
    pub timeouts: TimeoutController,
    pub retry: RetryPolicy,
    pub runner: RunnerRef,
    pub slots: Arc<Semaphore>,
    /// Identities submitted and not yet terminal, with their cancellation token.
    pub live: Mutex<HashMap<String, CancellationToken>>,
    pub running: AtomicUsize,
    pub runtime_token: CancellationToken,
    pub completions: Option<mpsc::UnboundedSender<Completion>>,
}

impl Shared {
    /// Cancellation token of a live identity.
    pub async fn token_of(&self, id: &str) -> Option<CancellationToken> {
        self.live.lock().await.get(id).cloned()
    }

    /// Terminal bookkeeping: publishes `TaskCompleted` and sends the completion.
    ///
    /// No-op if the identity already completed.
    pub async fn finish(&self, result: TaskResult, outcome: Outcome) {
        if self.live.lock().await.remove(&*result.task_id).is_none() {
            return;
        }
        debug!(task = %result.task_id, outcome = outcome.as_label(), attempt = result.attempt, "task completed");

        if outcome == Outcome::Canceled {
            self.bus
                .publish(Event::new(EventKind::TaskCanceled).with_task(Arc::clone(&result.task_id)));
        }
        let mut ev = Event::new(EventKind::TaskCompleted)
            .with_task(Arc::clone(&result.task_id))
            .with_outcome(outcome)
            .with_attempt(result.attempt);
        if let Some(err) = &result.error {
            ev = ev.with_reason(err.as_message());
        }
        self.bus.publish(ev);

        if let Some(tx) = &self.completions {
            let _ = tx.send(Completion { result, outcome });
        }
    }
}

/// Runs one attempt of `task` on the slot held by `permit`.
pub(super) async fn run_task(
    shared: Arc<Shared>,
    task: Task,
    permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
) {
    let id = task.id_arc();
    // Counts retries per identity, so a resubmitted identity keeps numbering.
    let attempt = shared.retry.attempts(&id).await + 1;

    if cancel.is_cancelled() {
        drop(permit);
        let mut result = TaskResult::not_run(id, RunError::Canceled);
        result.attempt = attempt;
        shared.finish(result, Outcome::Canceled).await;
        return;
    }

    shared.running.fetch_add(1, Ordering::Relaxed);
    let started_at = SystemTime::now();
    shared.bus.publish(
        Event::new(EventKind::TaskStarting)
            .with_task(Arc::clone(&id))
            .with_attempt(attempt)
            .with_timeout(task.timeout())
            .with_priority(task.priority()),
    );

    let token = shared
        .timeouts
        .arm_child(&id, task.timeout(), &cancel)
        .await;
    let res = execute(&shared, &task, attempt, &token).await;
    // NoTimeoutSet here only means the deadline already fired.
    let _ = shared.timeouts.clear(&id).await;

    let res = if cancel.is_cancelled() {
        Err(RunError::Canceled)
    } else if token.is_cancelled() {
        Err(RunError::TimedOut {
            timeout: task.timeout(),
        })
    } else {
        res
    };

    shared.running.fetch_sub(1, Ordering::Relaxed);
    drop(permit);

    let mut result = TaskResult {
        task_id: Arc::clone(&id),
        output: String::new(),
        error: None,
        started_at,
        finished_at: SystemTime::now(),
        attempt,
    };

    let err = match res {
        Ok(output) => {
            shared.bus.publish(
                Event::new(EventKind::TaskStopped)
                    .with_task(Arc::clone(&id))
                    .with_attempt(attempt)
                    .with_output(output.as_str()),
            );
            result.output = output;
            shared.finish(result, Outcome::Succeeded).await;
            return;
        }
        Err(err) => err,
    };

    shared.bus.publish(
        Event::new(EventKind::TaskFailed)
            .with_task(Arc::clone(&id))
            .with_attempt(attempt)
            .with_reason(err.as_message()),
    );
    result.error = Some(err.clone());

    if !err.is_retryable() {
        let outcome = match err {
            RunError::Canceled => Outcome::Canceled,
            _ => Outcome::Rejected,
        };
        shared.finish(result, outcome).await;
        return;
    }

    let decision = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = shared.retry.record_failure(task, &err) => Some(res),
    };
    match decision {
        Some(Ok(retry)) => {
            debug!(task = %id, retry, "task re-enqueued");
        }
        Some(Err(RetryError::Exhausted { .. })) => {
            shared.finish(result, Outcome::Exhausted).await;
        }
        Some(Err(e)) => {
            warn!(task = %id, error = %e, "retry failed; task rejected");
            shared.finish(result, Outcome::Rejected).await;
        }
        None => {
            result.error = Some(RunError::Canceled);
            shared.finish(result, Outcome::Canceled).await;
        }
    }
}

/// Runs the attempt; once `token` fires, waits at most `reclaim_grace` for it.
async fn execute(
    shared: &Shared,
    task: &Task,
    attempt: u32,
    token: &CancellationToken,
) -> Result<String, RunError> {
    let mut run = shared
        .runner
        .execute(task.payload(), task.timeout(), token.clone());

    tokio::select! {
        res = &mut run => res,
        _ = token.cancelled() => {
            let grace = shared.cfg.reclaim_grace;
            match time::timeout(grace, &mut run).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(task = %task.id(), attempt, ?grace, "attempt ignored cancellation; reclaiming slot");
                    shared.bus.publish(
                        Event::new(EventKind::SlotReclaimed)
                            .with_task(task.id_arc())
                            .with_attempt(attempt)
                            .with_delay(grace),
                    );
                    Err(RunError::Canceled)
                }
            }
        }
    }
}
