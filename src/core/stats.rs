/// Point-in-time load of a [`WorkerPool`](crate::WorkerPool).
///
/// Counters are read one after another, not under a common lock, so under
/// load they may disagree by a task in transit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Attempts currently executing.
    pub running: usize,
    /// Worker slots.
    pub pool_size: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
}

impl PoolStats {
    /// Worker slots not running an attempt.
    pub fn idle_workers(&self) -> usize {
        self.pool_size.saturating_sub(self.running)
    }
}
