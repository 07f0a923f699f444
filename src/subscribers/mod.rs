//! # Event subscribers (observers and loggers).
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in subscribers.
//!
//! ## Architecture
//! ```text
//! WorkerPool ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit()
//!                                                          │
//!                                     ┌──────────┬─────────┼───────────┬──────────────┐
//!                                     ▼          ▼         ▼           ▼              ▼
//!                                 LogWriter  TaskMonitor AttemptLog StateRecorder  custom
//! ```
//!
//! ## Built-in subscribers
//! - [`LogWriter`] lifecycle events as `tracing` records
//! - [`TaskMonitor`] latest status per identity (`Queued` .. `Canceled`)
//! - [`AttemptLog`] per-identity attempt history, optionally appended to a file
//! - [`StateRecorder`](crate::StateRecorder) persists statuses to a recovery store

mod attempt_log;
mod log;
mod monitor;
mod set;
mod subscribe;

pub use attempt_log::{AttemptLog, AttemptRecord};
pub use log::LogWriter;
pub use monitor::{StatusEntry, TaskMonitor, TaskStatus};
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
