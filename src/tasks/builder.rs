use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

use super::task::{Payload, Task};

/// Builder for [`Task`] with fluent API.
///
/// Without [`with_defaults`](TaskBuilder::with_defaults) a task gets
/// priority 0, a 30s timeout and no retries.
#[derive(Clone, Debug)]
pub struct TaskBuilder {
    id: Arc<str>,
    payload: Payload,
    priority: i32,
    timeout: Duration,
    max_retries: u32,
}

impl TaskBuilder {
    /// Creates a new builder for the given identity and payload.
    pub fn new(id: impl Into<Arc<str>>, payload: Payload) -> Self {
        let cfg = Config::default();
        Self {
            id: id.into(),
            payload,
            priority: 0,
            timeout: cfg.timeout,
            max_retries: 0,
        }
    }

    /// Inherits timeout and retry budget from the pool configuration.
    pub fn with_defaults(mut self, cfg: &Config) -> Self {
        self.timeout = cfg.timeout;
        self.max_retries = cfg.max_retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builds the task.
    pub fn build(self) -> Task {
        Task::new(
            self.id,
            self.payload,
            self.priority,
            self.timeout,
            self.max_retries,
        )
    }
}
