//! # WorkerPool: bounded-concurrency dispatch of queued scripts.
//!
//! The [`WorkerPool`] owns the queue, the deadline table, the retry policy, the
//! event bus and a fixed number of worker slots. It pulls tasks in priority
//! order and runs each one on a free slot under its own deadline.
//!
//! ## Architecture
//! ```text
//! submit(task) ──► live table (duplicate check) ──► PriorityQueue ──► TaskSubmitted
//!
//! dispatch loop (spawned by start()):
//!   loop {
//!     permit = slots.acquire()                 (blocks while all workers busy)
//!     task   = queue.dequeue()                 (empty: wait_for_task(poll_interval))
//!     workers.spawn(run_task(task, permit, live[task.id]))
//!   }
//!
//! run_task ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit(&Event)
//!     │                                                 ├─► LogWriter
//!     ├─ failure ──► RetryPolicy ──► PriorityQueue      ├─► TaskMonitor
//!     └─ terminal ──► Completion channel                └─► ...
//!
//! shutdown():
//!   closed = true ─► ShutdownRequested ─► runtime_token.cancel() (reaches every task token)
//!     ├─ queued tasks ─► Completion(Canceled)
//!     ├─ wait dispatcher + workers up to shutdown_grace
//!     │    ├─ all joined ─► AllStoppedWithin
//!     │    └─ timeout    ─► GraceExceeded { stuck }
//!     └─ stop listener: forward buffered events, SubscriberSet::shutdown()
//! ```
//!
//! ## Rules
//! - At most `pool_size` attempts execute at any moment
//! - A slot is taken before dequeuing, so a task leaves the queue only when it
//!   can start immediately and later high-priority arrivals overtake the rest
//! - Every submitted task produces exactly one completion
//! - Subscribers have handled every event published before `shutdown` returns
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use scriptvisor::{Config, Outcome, Payload, RunError, RunnerFn, Task, WorkerPool};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config { pool_size: 2, ..Config::default() };
//!     let (tx, mut done) = mpsc::unbounded_channel();
//!
//!     let pool = WorkerPool::builder(cfg)
//!         .with_runner(RunnerFn::arc(|p: Payload, _c: CancellationToken| async move {
//!             Ok::<_, RunError>(format!("ran {}", p.script))
//!         }))
//!         .with_completions(tx)
//!         .build();
//!     pool.start().await?;
//!
//!     pool.submit(Task::builder("hello", Payload::new("hello.py")).build()).await?;
//!     let completion = done.recv().await.expect("completion");
//!     assert_eq!(completion.outcome, Outcome::Succeeded);
//!     assert_eq!(completion.result.output, "ran hello.py");
//!
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{QueueError, RunError, RuntimeError, SubmitError};
use crate::events::{Bus, Event, EventKind};
use crate::recovery::{RecoveryStore, TaskState};
use crate::subscribers::SubscriberSet;
use crate::tasks::{Outcome, Task, TaskResult};

use super::builder::WorkerPoolBuilder;
use super::shutdown;
use super::stats::PoolStats;
use super::worker::{self, Shared};

/// Fixed-size worker pool scheduling script tasks.
pub struct WorkerPool {
    pub(super) shared: Arc<Shared>,
    pub(super) listener: Mutex<Option<JoinHandle<()>>>,
    pub(super) listener_stop: CancellationToken,
    pub(super) recovery: Option<Arc<dyn RecoveryStore>>,
    pub(super) recovered: RwLock<HashMap<String, TaskState>>,
    pub(super) started: AtomicBool,
    pub(super) closed: AtomicBool,
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,
    pub(super) workers: Arc<Mutex<JoinSet<()>>>,
}

impl WorkerPool {
    /// Creates a builder for a pool with the given configuration.
    pub fn builder(cfg: Config) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(cfg)
    }

    /// Submits a task for execution.
    ///
    /// # Errors
    /// - [`SubmitError::Duplicate`] if the identity is queued, running, or waiting for a retry
    /// - [`SubmitError::QueueFull`] if the queue is at capacity
    /// - [`SubmitError::Closed`] after shutdown
    pub async fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubmitError::Closed);
        }
        let shared = &self.shared;
        let id = task.id().to_string();
        {
            let mut live = shared.live.lock().await;
            if live.contains_key(&id) {
                return Err(SubmitError::Duplicate { id });
            }
            live.insert(id.clone(), shared.runtime_token.child_token());
        }

        let ev = Event::new(EventKind::TaskSubmitted)
            .with_task(task.id_arc())
            .with_priority(task.priority());
        if let Err(e) = shared.queue.enqueue(task).await {
            shared.live.lock().await.remove(&id);
            debug!(task = %id, error = %e, "submission rejected");
            return Err(SubmitError::QueueFull {
                capacity: shared.queue.capacity(),
            });
        }
        shared.bus.publish(ev);
        Ok(())
    }

    /// Starts the dispatch loop.
    ///
    /// Loads the recovery snapshot first when a store is configured; a snapshot
    /// that cannot be read is logged and the pool starts with nothing recovered.
    ///
    /// # Errors
    /// [`RuntimeError::AlreadyRunning`] on a second call or after shutdown.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyRunning);
        }

        if let Some(store) = &self.recovery {
            match store.load().await {
                Ok(states) => {
                    info!(tasks = states.len(), "recovery snapshot loaded");
                    *self.recovered.write().await = states;
                }
                Err(e) => {
                    warn!(error = %e, label = e.as_label(), "recovery snapshot unusable; starting empty");
                }
            }
        }

        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.workers),
        ));
        *self.dispatcher.lock().await = Some(handle);
        debug!(pool_size = self.shared.cfg.pool_size_clamped(), "dispatch loop started");
        Ok(())
    }

    /// Cancels a task.
    ///
    /// A queued task is removed and completed as canceled right away. A task
    /// that is running or waiting for a retry has its token cancelled; its
    /// worker completes it.
    ///
    /// # Errors
    /// [`QueueError::NotFound`] if the identity is not live.
    pub async fn cancel(&self, id: &str) -> Result<(), QueueError> {
        let shared = &self.shared;
        let token = shared
            .token_of(id)
            .await
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
        token.cancel();

        if let Ok(task) = shared.queue.remove(id).await {
            debug!(task = %id, "queued task canceled");
            shared
                .finish(
                    TaskResult::not_run(task.id_arc(), RunError::Canceled),
                    Outcome::Canceled,
                )
                .await;
        }
        Ok(())
    }

    /// Current load.
    pub async fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            queued: shared.queue.size().await,
            running: shared.running.load(Ordering::Relaxed),
            pool_size: shared.cfg.pool_size_clamped(),
            queue_capacity: shared.queue.capacity(),
        }
    }

    /// Task states loaded from the recovery store by [`start`](Self::start).
    pub async fn recovered(&self) -> HashMap<String, TaskState> {
        self.recovered.read().await.clone()
    }

    /// New receiver of every event the pool publishes from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Retries already used by `id`; numbering of its next attempt starts here.
    pub async fn attempts(&self, id: &str) -> u32 {
        self.shared.retry.attempts(id).await
    }

    /// Restores the full retry budget of `id`.
    ///
    /// Counters survive completion, so a resubmitted identity continues its
    /// old count unless reset.
    pub async fn reset_retries(&self, id: &str) {
        self.shared.retry.reset(id).await;
    }

    /// Stops the pool.
    ///
    /// Refuses new submissions, cancels every task token, completes queued
    /// tasks as canceled and waits up to `shutdown_grace` for in-flight work.
    /// Subscribers are then drained, so they have seen every event published
    /// up to that point. Calling it again is a no-op.
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] listing identities still running when
    /// the grace period ended.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let shared = &self.shared;
        shared.bus.publish(Event::new(EventKind::ShutdownRequested));
        shared.runtime_token.cancel();
        self.cancel_queued().await;

        let grace = shared.cfg.shutdown_grace;
        let dispatcher = self.dispatcher.lock().await.take();
        let workers = Arc::clone(&self.workers);
        let done = async move {
            if let Some(handle) = dispatcher {
                let _ = handle.await;
            }
            let mut set = workers.lock().await;
            while set.join_next().await.is_some() {}
        };

        let res = match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                shared.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let mut stuck: Vec<String> = shared.live.lock().await.keys().cloned().collect();
                stuck.sort_unstable();
                warn!(?grace, ?stuck, "shutdown grace exceeded");
                shared.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_delay(grace)
                        .with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };
        // A retry that raced the cancellation may have re-enqueued its task.
        self.cancel_queued().await;
        self.stop_listener(grace).await;
        res
    }

    /// Starts the pool, waits for a termination signal, then shuts down.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start().await?;
        match shutdown::wait_for_shutdown_signal().await {
            Ok(signal) => info!(signal, "termination signal received"),
            Err(e) => warn!(error = %e, "signal listener failed; shutting down"),
        }
        self.shutdown().await
    }

    async fn cancel_queued(&self) {
        for task in self.shared.queue.drain().await {
            self.shared
                .finish(
                    TaskResult::not_run(task.id_arc(), RunError::Canceled),
                    Outcome::Canceled,
                )
                .await;
        }
    }

    async fn stop_listener(&self, grace: Duration) {
        self.listener_stop.cancel();
        let Some(handle) = self.listener.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(grace, handle).await.is_err() {
            warn!(?grace, "subscribers did not drain within grace");
        }
    }
}

/// Forwards bus events to `set` until `stop` fires, then hands over what is
/// still buffered and waits for the subscribers to finish.
///
/// Returns `None` when there is nobody to forward to.
pub(super) fn spawn_listener(
    bus: &Bus,
    set: SubscriberSet,
    stop: CancellationToken,
) -> Option<JoinHandle<()>> {
    if set.is_empty() {
        return None;
    }
    let mut rx = bus.subscribe();
    debug!(subscribers = set.len(), "subscriber listener started");
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged; events lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => set.emit(&ev),
                            Err(TryRecvError::Lagged(skipped)) => {
                                warn!(skipped, "subscriber listener lagged; events lost");
                            }
                            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                        }
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
        debug!("subscriber listener stopped");
    }))
}

/// Takes a slot, then a task, and hands both to a worker until shutdown.
async fn dispatch_loop(shared: Arc<Shared>, workers: Arc<Mutex<JoinSet<()>>>) {
    let stop = shared.runtime_token.clone();
    let poll = shared.cfg.poll_interval;

    loop {
        let permit = tokio::select! {
            _ = stop.cancelled() => break,
            permit = Arc::clone(&shared.slots).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let task = loop {
            match shared.queue.dequeue().await {
                Ok(task) => break Some(task),
                Err(_) => {
                    trace!("queue empty");
                    tokio::select! {
                        _ = stop.cancelled() => break None,
                        _ = shared.queue.wait_for_task(poll) => {}
                    }
                }
            }
        };
        let Some(task) = task else { break };

        let Some(cancel) = shared.token_of(task.id()).await else {
            warn!(task = %task.id(), "dequeued task is not live; dropped");
            continue;
        };
        trace!(task = %task.id(), priority = task.priority(), "dispatching");

        let mut set = workers.lock().await;
        while set.try_join_next().is_some() {}
        set.spawn(worker::run_task(Arc::clone(&shared), task, permit, cancel));
    }
    debug!("dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::recovery::JsonFileStore;
    use crate::runner::{RunnerFn, RunnerRef};
    use crate::subscribers::Subscribe;
    use crate::tasks::{Completion, Payload};

    fn cfg(pool_size: usize) -> Config {
        Config {
            pool_size,
            retry_interval: Duration::from_millis(10),
            reclaim_grace: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            ..Config::default()
        }
    }

    fn task(id: &str, script: &str) -> Task {
        Task::builder(id, Payload::new(script)).build()
    }

    /// Sleeps for `args[0]` ms (cooperatively), then echoes the script.
    fn sleeper() -> RunnerRef {
        RunnerFn::arc(|p: Payload, cancel: CancellationToken| async move {
            let ms = p.args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
            tokio::select! {
                _ = sleep(Duration::from_millis(ms)) => Ok(p.script),
                _ = cancel.cancelled() => Err(RunError::Canceled),
            }
        })
    }

    /// Waits for cancellation only.
    fn blocker() -> RunnerRef {
        RunnerFn::arc(|_p: Payload, cancel: CancellationToken| async move {
            cancel.cancelled().await;
            Err::<String, _>(RunError::Canceled)
        })
    }

    fn build(
        cfg: Config,
        runner: RunnerRef,
    ) -> (Arc<WorkerPool>, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::builder(cfg)
            .with_runner(runner)
            .with_completions(tx)
            .build();
        (pool, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Completion>) -> Completion {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("completion in time")
            .expect("channel open")
    }

    async fn wait_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind, id: &str) -> Event {
        timeout(Duration::from_secs(5), async {
            loop {
                let ev = rx.recv().await.expect("bus open");
                if ev.kind == kind && ev.task.as_deref() == Some(id) {
                    return ev;
                }
            }
        })
        .await
        .expect("event in time")
    }

    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn single_worker_runs_by_priority_one_at_a_time() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runner: RunnerRef = {
            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
            RunnerFn::arc(move |p: Payload, _c: CancellationToken| {
                let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RunError>(p.script)
                }
            })
        };
        let (pool, mut done) = build(cfg(1), runner);

        for (id, prio) in [("low", 1), ("high", 9), ("mid", 5), ("mid2", 5)] {
            let t = Task::builder(id, Payload::new(id)).with_priority(prio).build();
            pool.submit(t).await.unwrap();
        }
        pool.start().await.unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            let c = next(&mut done).await;
            assert_eq!(c.outcome, Outcome::Succeeded);
            assert_eq!(c.result.output, c.task_id());
            order.push(c.task_id().to_string());
        }
        assert_eq!(order, ["high", "mid", "mid2", "low"]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pool_runs_up_to_pool_size_concurrently() {
        let (pool, mut done) = build(cfg(3), sleeper());
        let mut events = pool.events();
        pool.start().await.unwrap();

        for i in 0..4 {
            let t = Task::builder(format!("t{i}"), Payload::new("s").with_args(["300"])).build();
            pool.submit(t).await.unwrap();
        }
        timeout(Duration::from_secs(5), async {
            let mut started = 0;
            while started < 3 {
                if events.recv().await.expect("bus open").kind == EventKind::TaskStarting {
                    started += 1;
                }
            }
        })
        .await
        .expect("three attempts started");
        let stats = pool.stats().await;
        assert_eq!(stats.running, 3);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.idle_workers(), 0);

        for _ in 0..4 {
            assert_eq!(next(&mut done).await.outcome, Outcome::Succeeded);
        }
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_task_retries_then_exhausts() {
        let runner: RunnerRef = RunnerFn::arc(|_p: Payload, _c: CancellationToken| async move {
            Err::<String, _>(RunError::ExecutionFailed {
                error: "exit status 1".into(),
            })
        });
        let (pool, mut done) = build(cfg(2), runner);
        let mut events = pool.events();
        pool.start().await.unwrap();

        let t = Task::builder("flaky", Payload::new("x"))
            .with_max_retries(2)
            .build();
        pool.submit(t).await.unwrap();

        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Exhausted);
        assert_eq!(c.result.attempt, 3);
        assert!(matches!(c.result.error, Some(RunError::ExecutionFailed { .. })));

        let seen = drain(&mut events);
        assert_eq!(count(&seen, EventKind::TaskStarting), 3);
        assert_eq!(count(&seen, EventKind::TaskFailed), 3);
        assert_eq!(count(&seen, EventKind::RetryScheduled), 2);
        assert_eq!(count(&seen, EventKind::RetryExhausted), 1);
        assert_eq!(count(&seen, EventKind::TaskCompleted), 1);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retry_can_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner: RunnerRef = {
            let calls = Arc::clone(&calls);
            RunnerFn::arc(move |_p: Payload, _c: CancellationToken| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(RunError::ExecutionFailed {
                            error: "first try".into(),
                        })
                    } else {
                        Ok("second try".to_string())
                    }
                }
            })
        };
        let (pool, mut done) = build(cfg(1), runner);
        pool.start().await.unwrap();
        pool.submit(Task::builder("r", Payload::new("x")).with_max_retries(3).build())
            .await
            .unwrap();

        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Succeeded);
        assert_eq!(c.result.attempt, 2);
        assert_eq!(c.result.output, "second try");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let runner: RunnerRef = RunnerFn::arc(|_p: Payload, _c: CancellationToken| async move {
            Err::<String, _>(RunError::Fatal {
                error: "interpreter missing".into(),
            })
        });
        let (pool, mut done) = build(cfg(1), runner);
        pool.start().await.unwrap();
        pool.submit(Task::builder("f", Payload::new("x")).with_max_retries(5).build())
            .await
            .unwrap();

        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Rejected);
        assert_eq!(c.result.attempt, 1);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn deadline_cancels_cooperative_runner() {
        let (pool, mut done) = build(cfg(1), blocker());
        let mut events = pool.events();
        pool.start().await.unwrap();

        let t = Task::builder("slow", Payload::new("x"))
            .with_timeout(Duration::from_millis(30))
            .build();
        pool.submit(t).await.unwrap();

        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Exhausted);
        assert_eq!(
            c.result.error,
            Some(RunError::TimedOut {
                timeout: Duration::from_millis(30)
            })
        );
        let seen = drain(&mut events);
        assert_eq!(count(&seen, EventKind::TimeoutHit), 1);
        assert_eq!(count(&seen, EventKind::SlotReclaimed), 0);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn late_success_after_deadline_is_timed_out() {
        let runner: RunnerRef = RunnerFn::arc(|p: Payload, _c: CancellationToken| async move {
            sleep(Duration::from_millis(200)).await;
            Ok::<_, RunError>(p.script)
        });
        let cfg = Config {
            reclaim_grace: Duration::from_millis(500),
            ..cfg(1)
        };
        let (pool, mut done) = build(cfg, runner);
        let mut events = pool.events();
        pool.start().await.unwrap();

        let t = Task::builder("late", Payload::new("x"))
            .with_timeout(Duration::from_millis(20))
            .build();
        pool.submit(t).await.unwrap();

        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Exhausted);
        assert_eq!(
            c.result.error,
            Some(RunError::TimedOut {
                timeout: Duration::from_millis(20)
            })
        );
        assert!(c.result.output.is_empty());

        let seen = drain(&mut events);
        assert_eq!(count(&seen, EventKind::TimeoutHit), 1);
        assert_eq!(count(&seen, EventKind::SlotReclaimed), 0);
        assert_eq!(count(&seen, EventKind::TaskStopped), 0);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn resubmission_keeps_retry_count_until_reset() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner: RunnerRef = {
            let calls = Arc::clone(&calls);
            RunnerFn::arc(move |_p: Payload, _c: CancellationToken| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(RunError::ExecutionFailed {
                        error: "exit status 1".into(),
                    })
                }
            })
        };
        let (pool, mut done) = build(cfg(1), runner);
        pool.start().await.unwrap();
        let again = || Task::builder("job", Payload::new("x")).with_max_retries(1).build();

        pool.submit(again()).await.unwrap();
        let c = next(&mut done).await;
        assert_eq!((c.outcome, c.result.attempt), (Outcome::Exhausted, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.attempts("job").await, 1);

        // The budget is already spent: one run, then exhausted.
        pool.submit(again()).await.unwrap();
        let c = next(&mut done).await;
        assert_eq!((c.outcome, c.result.attempt), (Outcome::Exhausted, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        pool.reset_retries("job").await;
        assert_eq!(pool.attempts("job").await, 0);

        pool.submit(again()).await.unwrap();
        let c = next(&mut done).await;
        assert_eq!((c.outcome, c.result.attempt), (Outcome::Exhausted, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stuck_runner_slot_is_reclaimed() {
        let runner: RunnerRef = RunnerFn::arc(|p: Payload, _c: CancellationToken| async move {
            if p.script == "stuck" {
                sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, RunError>(p.script)
        });
        let (pool, mut done) = build(cfg(1), runner);
        let mut events = pool.events();
        pool.start().await.unwrap();

        let stuck = Task::builder("stuck", Payload::new("stuck"))
            .with_timeout(Duration::from_millis(20))
            .build();
        pool.submit(stuck).await.unwrap();
        pool.submit(task("after", "after")).await.unwrap();

        let first = next(&mut done).await;
        assert_eq!(first.task_id(), "stuck");
        assert!(matches!(first.result.error, Some(RunError::TimedOut { .. })));
        wait_event(&mut events, EventKind::SlotReclaimed, "stuck").await;

        let second = next(&mut done).await;
        assert_eq!(second.task_id(), "after");
        assert_eq!(second.outcome, Outcome::Succeeded);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_queued_task() {
        let (pool, mut done) = build(cfg(1), sleeper());
        pool.submit(task("q", "x")).await.unwrap();

        pool.cancel("q").await.unwrap();
        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Canceled);
        assert_eq!(c.result.error, Some(RunError::Canceled));
        assert_eq!(pool.stats().await.queued, 0);

        assert!(matches!(
            pool.cancel("q").await,
            Err(QueueError::NotFound { .. })
        ));
        // The identity is free again.
        pool.submit(task("q", "x")).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_running_task() {
        let (pool, mut done) = build(cfg(1), blocker());
        let mut events = pool.events();
        pool.start().await.unwrap();
        pool.submit(task("r", "x")).await.unwrap();
        wait_event(&mut events, EventKind::TaskStarting, "r").await;

        pool.cancel("r").await.unwrap();
        let c = next(&mut done).await;
        assert_eq!(c.outcome, Outcome::Canceled);
        assert_eq!(c.result.error, Some(RunError::Canceled));
        wait_event(&mut events, EventKind::TaskCanceled, "r").await;
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_and_full_queue_are_refused() {
        let cfg = Config {
            queue_capacity: 1,
            ..cfg(1)
        };
        let (pool, _done) = build(cfg, sleeper());

        pool.submit(task("a", "x")).await.unwrap();
        assert_eq!(
            pool.submit(task("a", "x")).await,
            Err(SubmitError::Duplicate { id: "a".into() })
        );
        assert_eq!(
            pool.submit(task("b", "x")).await,
            Err(SubmitError::QueueFull { capacity: 1 })
        );
        // A refused submission leaves no trace.
        assert!(matches!(
            pool.cancel("b").await,
            Err(QueueError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_and_closes() {
        let (pool, mut done) = build(cfg(1), sleeper());
        let mut events = pool.events();
        pool.start().await.unwrap();

        let long = |id: &str| Task::builder(id, Payload::new("s").with_args(["60000"])).build();
        pool.submit(long("running")).await.unwrap();
        pool.submit(long("queued")).await.unwrap();
        wait_event(&mut events, EventKind::TaskStarting, "running").await;

        pool.shutdown().await.unwrap();

        let mut ids = HashSet::new();
        for _ in 0..2 {
            let c = next(&mut done).await;
            assert_eq!(c.outcome, Outcome::Canceled);
            ids.insert(c.task_id().to_string());
        }
        assert_eq!(ids, HashSet::from(["running".to_string(), "queued".to_string()]));
        assert!(done.try_recv().is_err());

        let seen = drain(&mut events);
        assert_eq!(count(&seen, EventKind::ShutdownRequested), 1);
        assert_eq!(count(&seen, EventKind::AllStoppedWithin), 1);

        assert_eq!(pool.submit(task("late", "x")).await, Err(SubmitError::Closed));
        assert_eq!(pool.start().await, Err(RuntimeError::AlreadyRunning));
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_reports_stuck_tasks() {
        let runner: RunnerRef = RunnerFn::arc(|_p: Payload, _c: CancellationToken| async move {
            sleep(Duration::from_secs(60)).await;
            Ok::<_, RunError>(String::new())
        });
        let cfg = Config {
            reclaim_grace: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(50),
            ..cfg(1)
        };
        let (pool, _done) = build(cfg, runner);
        let mut events = pool.events();
        pool.start().await.unwrap();
        pool.submit(task("stuck", "x")).await.unwrap();
        wait_event(&mut events, EventKind::TaskStarting, "stuck").await;

        match pool.shutdown().await {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, ["stuck"]),
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_twice_is_refused() {
        let (pool, _done) = build(cfg(1), sleeper());
        pool.start().await.unwrap();
        assert_eq!(pool.start().await, Err(RuntimeError::AlreadyRunning));
        pool.shutdown().await.unwrap();
    }

    async fn completes_mixed_workload_exactly_once() {
        let runner: RunnerRef = RunnerFn::arc(|p: Payload, cancel: CancellationToken| async move {
            match p.script.as_str() {
                "ok" => Ok("ok".to_string()),
                "fail" => Err(RunError::ExecutionFailed {
                    error: "boom".into(),
                }),
                "fatal" => Err(RunError::Fatal {
                    error: "missing".into(),
                }),
                _ => {
                    cancel.cancelled().await;
                    Err(RunError::Canceled)
                }
            }
        });
        let (pool, mut done) = build(cfg(3), runner);
        pool.start().await.unwrap();

        let kinds = ["ok", "fail", "fatal", "hang"];
        for i in 0..20 {
            let t = Task::builder(format!("t{i}"), Payload::new(kinds[i % kinds.len()]))
                .with_max_retries(1)
                .with_timeout(Duration::from_millis(30))
                .with_priority((i % 3) as i32)
                .build();
            pool.submit(t).await.unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let c = next(&mut done).await;
            let id = c.task_id().to_string();
            assert!(seen.insert(id.clone()), "second completion for {id}");
        }
        pool.shutdown().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(done.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_task_completes_exactly_once() {
        completes_mixed_workload_exactly_once().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_task_completes_exactly_once_on_multi_thread_runtime() {
        completes_mixed_workload_exactly_once().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_size_holds_on_multi_thread_runtime() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runner: RunnerRef = {
            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
            RunnerFn::arc(move |p: Payload, _c: CancellationToken| {
                let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RunError>(p.script)
                }
            })
        };
        let (pool, mut done) = build(cfg(3), runner);
        pool.start().await.unwrap();

        for i in 0..40 {
            pool.submit(task(&format!("t{i}"), "x")).await.unwrap();
        }
        for _ in 0..40 {
            assert_eq!(next(&mut done).await.outcome, Outcome::Succeeded);
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().await.running, 0);
        pool.shutdown().await.unwrap();
    }

    struct Kinds(std::sync::Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "kinds"
        }
    }

    #[tokio::test]
    async fn shutdown_drains_subscribers() {
        let kinds = Arc::new(Kinds(std::sync::Mutex::new(Vec::new())));
        let (tx, mut done) = mpsc::unbounded_channel();
        let pool = WorkerPool::builder(cfg(1))
            .with_runner(sleeper())
            .with_completions(tx)
            .with_subscribers(vec![kinds.clone()])
            .build();
        pool.start().await.unwrap();
        pool.submit(task("a", "x")).await.unwrap();
        assert_eq!(next(&mut done).await.outcome, Outcome::Succeeded);

        pool.shutdown().await.unwrap();
        let seen = kinds.0.lock().unwrap().clone();
        assert!(seen.contains(&EventKind::TaskCompleted));
        assert_eq!(seen.last(), Some(&EventKind::AllStoppedWithin));
    }

    #[tokio::test]
    async fn malformed_recovery_snapshot_still_starts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("task_states.json"), b"[oops").unwrap();

        let (tx, mut done) = mpsc::unbounded_channel();
        let pool = WorkerPool::builder(cfg(1))
            .with_runner(sleeper())
            .with_completions(tx)
            .with_recovery(Arc::new(JsonFileStore::new(dir.path())))
            .build();
        pool.start().await.unwrap();
        assert!(pool.recovered().await.is_empty());

        pool.submit(task("a", "x")).await.unwrap();
        assert_eq!(next(&mut done).await.outcome, Outcome::Succeeded);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn recovery_persists_states_and_reloads_them() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));

        let (tx, mut done) = mpsc::unbounded_channel();
        let pool = WorkerPool::builder(cfg(1))
            .with_runner(sleeper())
            .with_completions(tx)
            .with_recovery(store.clone())
            .build();
        pool.start().await.unwrap();
        pool.submit(task("saved", "x")).await.unwrap();
        assert_eq!(next(&mut done).await.outcome, Outcome::Succeeded);

        // Shutdown drains the recorder, so the terminal state is on disk.
        pool.shutdown().await.unwrap();
        assert_eq!(store.recover("saved").await.unwrap().state, "succeeded");

        let (pool, _done) = {
            let (tx, rx) = mpsc::unbounded_channel();
            let pool = WorkerPool::builder(cfg(1))
                .with_runner(sleeper())
                .with_completions(tx)
                .with_recovery(Arc::new(JsonFileStore::new(dir.path())))
                .build();
            (pool, rx)
        };
        pool.start().await.unwrap();
        assert_eq!(pool.recovered().await["saved"].state, "succeeded");
        pool.shutdown().await.unwrap();
    }
}
