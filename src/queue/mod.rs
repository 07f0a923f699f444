//! Pending-task queue.
//!
//! ## Contents
//! - [`PriorityQueue`] bounded, stable priority queue shared by submitters, the
//!   dispatch loop and the retry policy
//! - [`QueueMode`] dequeue ordering (priority, or plain FIFO/LIFO)

mod mode;
mod priority;

pub use mode::QueueMode;
pub use priority::PriorityQueue;
