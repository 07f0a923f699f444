//! # Task data model.
//!
//! This module provides the units of work the pool schedules and what it
//! reports back:
//! - [`Task`] - identity, script payload, priority, timeout budget, retry budget
//! - [`Payload`] - script text plus argument list handed to the runner
//! - [`TaskBuilder`] - fluent construction, optionally from [`Config`](crate::Config) defaults
//! - [`TaskResult`] - outcome of one dispatch attempt
//! - [`Completion`] / [`Outcome`] - terminal report, exactly one per submitted task

mod builder;
mod result;
mod task;

pub use builder::TaskBuilder;
pub use result::{Completion, Outcome, TaskResult};
pub use task::{Payload, Task};
