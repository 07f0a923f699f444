//! Retry decisions and retry pacing.
//!
//! ## Contents
//! - [`RetryPolicy`] per-identity retry budget; re-enqueues failed tasks
//! - [`BackoffPolicy`] how long to wait before a re-enqueue (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization strategy to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! worker ── attempt failed (retryable) ──► RetryPolicy::record_failure(task, err)
//!                                             ├─ budget left: sleep(backoff.next(n)) ─► PriorityQueue::enqueue
//!                                             └─ budget spent: Err(RetryError::Exhausted)
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=1.0 (constant RetryInterval), max=30s, jitter=None.

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
