//! # scriptvisor
//!
//! **Scriptvisor** is a bounded-concurrency scheduler for script tasks.
//!
//! Tasks carry a script payload, a priority, a timeout budget and a retry
//! budget. A fixed-size [`WorkerPool`] runs them in priority order, enforces
//! every deadline through cancellation, retries failures with a pause, and
//! reports each task's terminal outcome exactly once.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │     Task     │   │     Task     │   │     Task     │
//!     │ (priority 5) │   │ (priority 1) │   │ (priority 9) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            └──────── submit() ┴──────────────────┘
//!                               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  WorkerPool                                                       │
//! │  - PriorityQueue (bounded, stable priority / FIFO / LIFO)         │
//! │  - worker slots (Semaphore, pool_size)                            │
//! │  - TimeoutController (one deadline + token per in-flight task)    │
//! │  - RetryPolicy (per-identity budget, backoff, re-enqueue)         │
//! │  - Bus ─► SubscriberSet (LogWriter, TaskMonitor, AttemptLog, ...) │
//! └──────┬───────────────────┬───────────────────┬────────────────────┘
//!        ▼                   ▼                   ▼
//!   ┌─────────┐         ┌─────────┐         ┌─────────┐
//!   │ worker 1│         │ worker 2│   ...   │ worker N│
//!   └────┬────┘         └────┬────┘         └────┬────┘
//!        └──────────► ScriptRunner::execute ◄────┘
//! ```
//!
//! ### Lifecycle of one task
//! ```text
//! submit ─► queued ─► (slot free) dequeued ─► arm deadline ─► runner.execute
//!                                                  │
//!        ┌─────────────────────────────────────────┴───────────────────────┐
//!        ▼                          ▼                                      ▼
//!      Ok(output)         retryable error / timeout              Fatal / Canceled
//!        │                          │                                      │
//!   Completion(Succeeded)   RetryPolicy::record_failure          Completion(Rejected|Canceled)
//!                            ├─ budget left: sleep, re-enqueue ─► queued
//!                            └─ exhausted ─► Completion(Exhausted)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Scheduling**    | Bounded worker pool with priority dispatch.                   | [`WorkerPool`], [`PriorityQueue`]           |
//! | **Deadlines**     | Per-task timeout with cooperative cancel and slot reclaim.    | [`TimeoutController`]                       |
//! | **Retries**       | Per-identity retry budget with constant or growing backoff.   | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Execution**     | Interpreter processes or closures.                            | [`ScriptRunner`], [`ProcessRunner`], [`RunnerFn`] |
//! | **Observability** | Lifecycle events, logging, status monitor, attempt history.   | [`Subscribe`], [`LogWriter`], [`TaskMonitor`] |
//! | **Recovery**      | Task states persisted as JSON across restarts.                | [`RecoveryStore`], [`JsonFileStore`]        |
//! | **Configuration** | Struct defaults or `SCRIPTVISOR_*` environment.               | [`Config`]                                  |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scriptvisor::{Config, LogWriter, Payload, ProcessRunner, Subscribe, Task, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     scriptvisor::load_dotenv();
//!     let cfg = Config::from_env();
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let pool = WorkerPool::builder(cfg.clone())
//!         .with_runner(Arc::new(ProcessRunner::python()))
//!         .with_subscribers(subs)
//!         .build();
//!
//!     pool.submit(
//!         Task::builder("hello", Payload::new("print('hello')"))
//!             .with_defaults(&cfg)
//!             .with_timeout(Duration::from_secs(5))
//!             .build(),
//!     )
//!     .await?;
//!
//!     // Runs until SIGINT/SIGTERM, then drains.
//!     pool.run().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod queue;
mod recovery;
mod runner;
mod subscribers;
mod tasks;
mod timeout;

// ---- Public re-exports ----

pub use config::{Config, load_dotenv};
pub use core::{PoolStats, WorkerPool, WorkerPoolBuilder};
pub use error::{
    QueueError, RecoveryError, RetryError, RunError, RuntimeError, SubmitError, TimeoutError,
};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use queue::{PriorityQueue, QueueMode};
pub use recovery::{JsonFileStore, RecoveryStore, StateRecorder, TaskState};
pub use runner::{ProcessRunner, RunnerFn, RunnerRef, ScriptRunner};
pub use subscribers::{
    AttemptLog, AttemptRecord, LogWriter, StatusEntry, Subscribe, SubscriberSet, TaskMonitor,
    TaskStatus,
};
pub use tasks::{Completion, Outcome, Payload, Task, TaskBuilder, TaskResult};
pub use timeout::{TimeoutController, TimeoutState};
