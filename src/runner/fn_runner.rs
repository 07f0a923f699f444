//! # Function-backed runner (`RunnerFn`)
//!
//! [`RunnerFn`] wraps a closure `F: Fn(Payload, CancellationToken) -> Fut`,
//! producing a fresh future per attempt. State shared between attempts must be
//! put in an `Arc` inside the closure explicitly.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use scriptvisor::{Payload, RunError, RunnerFn, RunnerRef};
//!
//! let echo: RunnerRef = RunnerFn::arc(|payload: Payload, _cancel: CancellationToken| async move {
//!     Ok::<_, RunError>(payload.args.join(" "))
//! });
//! # let _ = echo;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::tasks::Payload;

use super::ScriptRunner;

/// Closure-backed [`ScriptRunner`].
///
/// The timeout is enforced by the pool; the closure only sees the token.
#[derive(Debug)]
pub struct RunnerFn<F> {
    f: F,
}

impl<F> RunnerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the runner as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> ScriptRunner for RunnerFn<F>
where
    F: Fn(Payload, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, RunError>> + Send + 'static,
{
    async fn execute(
        &self,
        payload: &Payload,
        _timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, RunError> {
        (self.f)(payload.clone(), cancel).await
    }
}
