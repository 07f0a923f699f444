//! Pool core: dispatch, workers and lifecycle.
//!
//! The public API from this module is [`WorkerPool`] (with its builder and
//! [`PoolStats`]), which owns the dispatch loop, the worker slots and shutdown.
//!
//! Internal modules:
//! - [`pool`]: submit/cancel/stats, the dispatch loop and graceful shutdown;
//! - [`worker`]: one attempt under a deadline, then success/retry/terminal routing;
//! - [`builder`]: wires queue, timeouts, retry policy, runner, bus and subscribers;
//! - [`shutdown`]: cross-platform termination signal handling.

mod builder;
mod pool;
mod shutdown;
mod stats;
mod worker;

pub use builder::WorkerPoolBuilder;
pub use pool::WorkerPool;
pub use stats::PoolStats;
