//! # Bounded stable priority queue.
//!
//! [`PriorityQueue`] holds tasks that were submitted (or re-enqueued by the
//! retry policy) and not yet dispatched. It knows nothing about execution.
//!
//! ## Architecture
//! ```text
//! submit() ──┐                                     ┌──► dequeue() (dispatch loop)
//!            ├──► Mutex<BTreeMap<(rank, seq), Task>>┤
//! retry ─────┘         │                           └──► lookup()/remove() (diagnostics, cancel)
//!                      └──► Notify ──► wait_for_task() (dispatch loop idle wait)
//! ```
//!
//! ## Rules
//! - `enqueue` fails with `Full` when `len >= capacity` and leaves the queue unchanged
//! - Every entry gets a monotonic sequence number at insertion; in
//!   [`QueueMode::Priority`] it breaks ties so equal priorities dequeue FIFO
//! - All operations serialize under one lock; the lock is never held across an await
//!   other than its own acquisition
//! - `lookup` only sees queued tasks, never in-flight ones

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time;

use crate::error::QueueError;
use crate::tasks::Task;

use super::mode::QueueMode;

/// Lock-protected queue contents.
struct Entries {
    next_seq: u64,
    tasks: BTreeMap<(i64, i64), Task>,
}

struct Inner {
    capacity: usize,
    mode: QueueMode,
    entries: Mutex<Entries>,
    notify: Notify,
}

/// Shared handle to a bounded pending-task queue.
///
/// Cloning is cheap; all clones see the same queue.
///
/// ## Example
/// ```rust
/// # tokio_test_block(async {
/// use scriptvisor::{Payload, PriorityQueue, QueueMode, Task};
///
/// let q = PriorityQueue::new(2, QueueMode::Priority);
/// q.enqueue(Task::builder("a", Payload::new("")).with_priority(1).build()).await.unwrap();
/// q.enqueue(Task::builder("b", Payload::new("")).with_priority(5).build()).await.unwrap();
///
/// assert_eq!(q.dequeue().await.unwrap().id(), "b");
/// assert_eq!(q.dequeue().await.unwrap().id(), "a");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct PriorityQueue {
    inner: Arc<Inner>,
}

impl PriorityQueue {
    /// Creates an empty queue.
    pub fn new(capacity: usize, mode: QueueMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                mode,
                entries: Mutex::new(Entries {
                    next_seq: 0,
                    tasks: BTreeMap::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Inserts a task, keeping the active ordering.
    ///
    /// Fails with [`QueueError::Full`] if the queue holds `capacity` tasks.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        {
            let mut entries = self.inner.entries.lock().await;
            if entries.tasks.len() >= self.inner.capacity {
                return Err(QueueError::Full {
                    capacity: self.inner.capacity,
                });
            }
            let seq = entries.next_seq;
            entries.next_seq += 1;
            let key = self.inner.mode.key(task.priority(), seq);
            entries.tasks.insert(key, task);
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the head task.
    ///
    /// Fails with [`QueueError::Empty`] if nothing is queued.
    pub async fn dequeue(&self) -> Result<Task, QueueError> {
        let mut entries = self.inner.entries.lock().await;
        entries
            .tasks
            .pop_first()
            .map(|(_, task)| task)
            .ok_or(QueueError::Empty)
    }

    /// Returns a copy of a still-queued task without removing it.
    ///
    /// Fails with [`QueueError::NotFound`] if no queued task has this identity.
    pub async fn lookup(&self, id: &str) -> Result<Task, QueueError> {
        let entries = self.inner.entries.lock().await;
        entries
            .tasks
            .values()
            .find(|t| t.id() == id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })
    }

    /// Removes a still-queued task by identity.
    pub async fn remove(&self, id: &str) -> Result<Task, QueueError> {
        let mut entries = self.inner.entries.lock().await;
        let key = entries
            .tasks
            .iter()
            .find(|(_, t)| t.id() == id)
            .map(|(k, _)| *k)
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
        entries
            .tasks
            .remove(&key)
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })
    }

    /// Removes every queued task, in dequeue order.
    pub async fn drain(&self) -> Vec<Task> {
        let mut entries = self.inner.entries.lock().await;
        std::mem::take(&mut entries.tasks).into_values().collect()
    }

    /// Returns true if a task with this identity is queued.
    pub async fn contains(&self, id: &str) -> bool {
        self.lookup(id).await.is_ok()
    }

    /// Current number of queued tasks.
    pub async fn size(&self) -> usize {
        self.inner.entries.lock().await.tasks.len()
    }

    /// Returns true if nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Active ordering.
    pub fn mode(&self) -> QueueMode {
        self.inner.mode
    }

    /// Waits until a task is enqueued or `max_wait` elapses.
    ///
    /// Returns `true` when woken by an enqueue. An enqueue that happened while
    /// nobody was waiting is remembered, so the next call returns immediately.
    pub async fn wait_for_task(&self, max_wait: Duration) -> bool {
        time::timeout(max_wait, self.inner.notify.notified())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Payload;

    fn task(id: &str, priority: i32) -> Task {
        Task::builder(id, Payload::new("")).with_priority(priority).build()
    }

    async fn drain_ids(q: &PriorityQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(t) = q.dequeue().await {
            out.push(t.id().to_string());
        }
        out
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let q = PriorityQueue::new(2, QueueMode::Priority);
        q.enqueue(task("A", 1)).await.unwrap();
        q.enqueue(task("B", 5)).await.unwrap();

        let err = q.enqueue(task("C", 9)).await.unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 2 });
        assert_eq!(q.size().await, 2);

        assert_eq!(q.dequeue().await.unwrap().id(), "B");
        assert_eq!(q.dequeue().await.unwrap().id(), "A");
        assert_eq!(q.dequeue().await.unwrap_err(), QueueError::Empty);
    }

    #[tokio::test]
    async fn equal_priorities_are_fifo() {
        let q = PriorityQueue::new(16, QueueMode::Priority);
        for (id, p) in [("a", 1), ("b", 3), ("c", 1), ("d", 3), ("e", 2), ("f", 1)] {
            q.enqueue(task(id, p)).await.unwrap();
        }
        assert_eq!(drain_ids(&q).await, ["b", "d", "e", "a", "c", "f"]);
    }

    #[tokio::test]
    async fn fifo_and_lifo_ignore_priority() {
        let fifo = PriorityQueue::new(8, QueueMode::Fifo);
        let lifo = PriorityQueue::new(8, QueueMode::Lifo);
        for (id, p) in [("a", 1), ("b", 9), ("c", 5)] {
            fifo.enqueue(task(id, p)).await.unwrap();
            lifo.enqueue(task(id, p)).await.unwrap();
        }
        assert_eq!(drain_ids(&fifo).await, ["a", "b", "c"]);
        assert_eq!(drain_ids(&lifo).await, ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn lookup_does_not_remove() {
        let q = PriorityQueue::new(4, QueueMode::Priority);
        q.enqueue(task("x", 0)).await.unwrap();

        assert_eq!(q.lookup("x").await.unwrap().id(), "x");
        assert_eq!(q.size().await, 1);
        assert_eq!(
            q.lookup("y").await.unwrap_err(),
            QueueError::NotFound { id: "y".into() }
        );

        q.dequeue().await.unwrap();
        assert!(q.lookup("x").await.is_err());
    }

    #[tokio::test]
    async fn remove_and_drain() {
        let q = PriorityQueue::new(4, QueueMode::Priority);
        q.enqueue(task("a", 1)).await.unwrap();
        q.enqueue(task("b", 2)).await.unwrap();
        q.enqueue(task("c", 3)).await.unwrap();

        assert_eq!(q.remove("b").await.unwrap().id(), "b");
        assert!(q.remove("b").await.is_err());

        let rest: Vec<String> = q.drain().await.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(rest, ["c", "a"]);
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_wakes_on_enqueue() {
        let q = PriorityQueue::new(4, QueueMode::Priority);
        assert!(!q.wait_for_task(Duration::from_millis(10)).await);

        let producer = q.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(5)).await;
            producer.enqueue(task("late", 0)).await.unwrap();
        });
        assert!(q.wait_for_task(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn concurrent_producers_respect_capacity() {
        let q = PriorityQueue::new(50, QueueMode::Priority);
        let mut handles = Vec::new();
        for i in 0..100 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue(task(&format!("t{i}"), i % 7)).await.is_ok()
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 50);
        assert_eq!(q.size().await, 50);
    }
}
