//! # Script execution boundary.
//!
//! The pool never runs scripts itself; it hands each attempt to a
//! [`ScriptRunner`]. Implementations:
//! - [`ProcessRunner`] stages the script in a private temp directory and runs
//!   it with an interpreter (optionally inside a virtual environment)
//! - [`RunnerFn`] closure-backed runner for tests and embedding
//!
//! ## Contract
//! - `execute` returns the captured output on success
//! - When `cancel` fires the runner should stop promptly and return
//!   [`RunError::Canceled`]; the pool force-reclaims the slot after a grace
//!   period if it does not
//! - Environment problems (interpreter missing, script not stageable) are
//!   [`RunError::Fatal`] and never retried

mod fn_runner;
mod process;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::tasks::Payload;

pub use fn_runner::RunnerFn;
pub use process::ProcessRunner;

/// Shared handle to a runner.
pub type RunnerRef = Arc<dyn ScriptRunner>;

/// Executes one attempt of a script.
#[async_trait]
pub trait ScriptRunner: Send + Sync + 'static {
    /// Runs `payload` once, within `timeout`, until done or `cancel` fires.
    async fn execute(
        &self,
        payload: &Payload,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, RunError>;
}
