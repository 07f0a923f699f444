use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::Bus;
use crate::policies::{BackoffPolicy, RetryPolicy};
use crate::queue::PriorityQueue;
use crate::recovery::{RecoveryStore, StateRecorder};
use crate::runner::{ProcessRunner, RunnerRef};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::Completion;
use crate::timeout::TimeoutController;

use super::pool::{WorkerPool, spawn_listener};
use super::worker::Shared;

/// Builder for a [`WorkerPool`].
///
/// Without [`with_runner`](Self::with_runner) scripts run through
/// [`ProcessRunner::python`].
pub struct WorkerPoolBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    runner: Option<RunnerRef>,
    backoff: Option<BackoffPolicy>,
    completions: Option<mpsc::UnboundedSender<Completion>>,
    recovery: Option<Arc<dyn RecoveryStore>>,
}

impl WorkerPoolBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            runner: None,
            backoff: None,
            completions: None,
            recovery: None,
        }
    }

    /// Sets the script runner.
    pub fn with_runner(mut self, runner: RunnerRef) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Overrides the retry pause (default: [`Config::backoff`]).
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Sets event subscribers (loggers, monitors, custom observers).
    ///
    /// Each subscriber gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Delivers one [`Completion`] per submitted task to `tx`.
    pub fn with_completions(mut self, tx: mpsc::UnboundedSender<Completion>) -> Self {
        self.completions = Some(tx);
        self
    }

    /// Persists task states to `store` and loads its snapshot on start.
    pub fn with_recovery(mut self, store: Arc<dyn RecoveryStore>) -> Self {
        self.recovery = Some(store);
        self
    }

    /// Builds the pool. Must be called inside a Tokio runtime.
    ///
    /// Spawns the subscriber workers and the bus listener; the dispatch loop
    /// starts with [`WorkerPool::start`].
    pub fn build(self) -> Arc<WorkerPool> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());

        let mut subscribers = self.subscribers;
        if let Some(store) = &self.recovery {
            subscribers.push(Arc::new(StateRecorder::new(Arc::clone(store))));
        }
        let subs = SubscriberSet::new(subscribers, bus.clone());
        let listener_stop = CancellationToken::new();
        let listener = spawn_listener(&bus, subs, listener_stop.clone());

        let queue = PriorityQueue::new(cfg.queue_capacity, cfg.queue_mode);
        let backoff = self.backoff.unwrap_or_else(|| cfg.backoff());
        let shared = Arc::new(Shared {
            timeouts: TimeoutController::new(Some(bus.clone())),
            retry: RetryPolicy::new(queue.clone(), backoff, Some(bus.clone())),
            runner: self
                .runner
                .unwrap_or_else(|| Arc::new(ProcessRunner::python())),
            slots: Arc::new(Semaphore::new(cfg.pool_size_clamped())),
            live: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            runtime_token: CancellationToken::new(),
            completions: self.completions,
            queue,
            bus,
            cfg,
        });

        Arc::new(WorkerPool {
            shared,
            listener: Mutex::new(listener),
            listener_stop,
            recovery: self.recovery,
            recovered: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
            workers: Arc::new(Mutex::new(JoinSet::new())),
        })
    }
}
