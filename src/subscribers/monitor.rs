//! # Task status monitor with sequence-based ordering.
//!
//! [`TaskMonitor`] keeps the latest known status of every task identity the
//! pool has seen, driven purely by events.
//!
//! ## Architecture
//! ```text
//! WorkerPool ──► Bus ──► SubscriberSet ──► TaskMonitor::on_event() ──► update()
//!                                                                        │
//!                                                                        ▼
//!                                                  HashMap<String, StatusEntry>
//! ```
//!
//! ## Transitions
//! ```text
//! TaskSubmitted                  ─► Queued
//! TaskStarting                   ─► Running   (attempts += 1, started_at on first attempt)
//! RetryScheduled                 ─► Retrying
//! TaskCompleted(Succeeded)       ─► Succeeded (ended_at)
//! TaskCompleted(Exhausted|Rejected) ─► Failed (ended_at)
//! TaskCompleted(Canceled) / TaskCanceled ─► Canceled (ended_at)
//! ```
//!
//! ## Rules
//! - Events with `seq <= last_seq` for the identity are rejected (stale)
//! - Other task events only advance `last_seq`
//! - Reads are eventually consistent with the pool

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::tasks::Outcome;

use super::Subscribe;

/// Observable status of a task identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Returns a short stable label (snake_case) for use in logs and snapshots.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// `true` once the task will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

/// What the monitor knows about one identity.
#[derive(Clone, Debug)]
pub struct StatusEntry {
    pub status: TaskStatus,
    /// Start of the first attempt.
    pub started_at: Option<SystemTime>,
    /// Time the task reached a terminal status.
    pub ended_at: Option<SystemTime>,
    /// Attempts started so far.
    pub attempts: u32,
    last_seq: u64,
}

/// Event-driven registry of task statuses.
pub struct TaskMonitor {
    state: RwLock<HashMap<String, StatusEntry>>,
}

impl Default for TaskMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMonitor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Applies an event if it is newer than the last one seen for its task.
    ///
    /// Returns `true` when the status changed.
    pub async fn update(&self, ev: &Event) -> bool {
        if ev.is_subscriber_event() {
            return false;
        }
        let Some(id) = ev.task.as_deref() else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(id.to_string()).or_insert(StatusEntry {
            status: TaskStatus::Queued,
            started_at: None,
            ended_at: None,
            attempts: 0,
            last_seq: 0,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        let fresh = entry.last_seq == 0;
        entry.last_seq = ev.seq;

        let next = match ev.kind {
            EventKind::TaskSubmitted => TaskStatus::Queued,
            EventKind::TaskStarting => {
                entry.attempts += 1;
                entry.started_at.get_or_insert(ev.at);
                TaskStatus::Running
            }
            EventKind::RetryScheduled => TaskStatus::Retrying,
            EventKind::TaskCanceled => TaskStatus::Canceled,
            EventKind::TaskCompleted => match ev.outcome {
                Some(Outcome::Succeeded) => TaskStatus::Succeeded,
                Some(Outcome::Canceled) => TaskStatus::Canceled,
                Some(Outcome::Exhausted | Outcome::Rejected) | None => TaskStatus::Failed,
            },
            _ => return false,
        };
        if next.is_terminal() {
            entry.ended_at = Some(ev.at);
        }
        let changed = fresh || entry.status != next;
        entry.status = next;
        changed
    }

    /// Latest status of `id`.
    pub async fn status(&self, id: &str) -> Option<StatusEntry> {
        self.state.read().await.get(id).cloned()
    }

    /// Copy of every known identity and its entry.
    pub async fn snapshot(&self) -> HashMap<String, StatusEntry> {
        self.state.read().await.clone()
    }

    /// Sorted identities currently running.
    pub async fn running(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl Subscribe for TaskMonitor {
    async fn on_event(&self, ev: &Event) {
        self.update(ev).await;
    }

    fn name(&self) -> &'static str {
        "task-monitor"
    }
}
