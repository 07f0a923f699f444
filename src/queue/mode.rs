//! # Dequeue ordering.
//!
//! - [`QueueMode::Priority`] highest priority first, FIFO among equals (default)
//! - [`QueueMode::Fifo`] submission order, priority ignored
//! - [`QueueMode::Lifo`] most recent submission first, priority ignored

use std::fmt;
use std::str::FromStr;

/// Ordering applied by [`PriorityQueue::dequeue`](crate::PriorityQueue::dequeue).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueMode {
    /// Stable priority order: higher priority first, then insertion order.
    #[default]
    Priority,
    /// Insertion order, ignoring priority.
    Fifo,
    /// Reverse insertion order, ignoring priority.
    Lifo,
}

impl QueueMode {
    /// Ordering key for an entry; the queue dequeues the smallest key first.
    pub(crate) fn key(self, priority: i32, seq: u64) -> (i64, i64) {
        // seq is a process-local counter and never reaches i64::MAX
        let seq = seq as i64;
        match self {
            QueueMode::Priority => (-i64::from(priority), seq),
            QueueMode::Fifo => (0, seq),
            QueueMode::Lifo => (0, -seq),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueMode::Priority => "priority",
            QueueMode::Fifo => "fifo",
            QueueMode::Lifo => "lifo",
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for QueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(QueueMode::Priority),
            "fifo" => Ok(QueueMode::Fifo),
            "lifo" => Ok(QueueMode::Lifo),
            other => Err(format!("unknown queue mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("FIFO".parse::<QueueMode>(), Ok(QueueMode::Fifo));
        assert_eq!(" lifo ".parse::<QueueMode>(), Ok(QueueMode::Lifo));
        assert!("random".parse::<QueueMode>().is_err());
    }

    #[test]
    fn priority_key_orders_high_first_then_seq() {
        let m = QueueMode::Priority;
        assert!(m.key(5, 9) < m.key(1, 0));
        assert!(m.key(1, 0) < m.key(1, 1));
    }
}
