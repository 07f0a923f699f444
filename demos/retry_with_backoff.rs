//! # Example: retry_with_backoff
//!
//! A task that fails twice before succeeding, and one that never succeeds.
//!
//! ## Flow
//! ```text
//! flaky:   attempt 1 ─► TaskFailed ─► RetryScheduled(200ms)
//!          attempt 2 ─► TaskFailed ─► RetryScheduled(400ms)
//!          attempt 3 ─► TaskStopped ─► Completion(Succeeded)
//!
//! broken:  attempt 1..=3 ─► TaskFailed ─► ... ─► RetryExhausted ─► Completion(Exhausted)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example retry_with_backoff
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use scriptvisor::{
    AttemptLog, Config, LogWriter, Payload, RunError, RunnerFn, Subscribe, Task, WorkerPool,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config {
        pool_size: 2,
        max_retries: 2,
        retry_interval: Duration::from_millis(200),
        ..Config::default()
    };
    // Double the pause on every retry.
    let mut backoff = cfg.backoff();
    backoff.factor = 2.0;

    let flaky_runs = Arc::new(AtomicU32::new(0));
    let runs = Arc::clone(&flaky_runs);
    let runner = RunnerFn::arc(move |p: Payload, _cancel: CancellationToken| {
        let runs = Arc::clone(&runs);
        async move {
            match p.script.as_str() {
                "flaky" if runs.fetch_add(1, Ordering::Relaxed) < 2 => Err(RunError::ExecutionFailed {
                    error: "transient failure".into(),
                }),
                "flaky" => Ok("recovered".to_string()),
                _ => Err(RunError::ExecutionFailed {
                    error: "always broken".into(),
                }),
            }
        }
    });

    let history = Arc::new(AttemptLog::new());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter), history.clone()];
    let (tx, mut done) = mpsc::unbounded_channel();

    let pool = WorkerPool::builder(cfg.clone())
        .with_runner(runner)
        .with_backoff(backoff)
        .with_subscribers(subs)
        .with_completions(tx)
        .build();
    pool.start().await?;

    for id in ["flaky", "broken"] {
        pool.submit(Task::builder(id, Payload::new(id)).with_defaults(&cfg).build())
            .await?;
    }

    for _ in 0..2 {
        if let Some(c) = done.recv().await {
            println!("{} -> {} after attempt {}", c.task_id(), c.outcome.as_label(), c.result.attempt);
        }
    }
    // Subscribers run asynchronously; give the log a moment to catch up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for id in ["flaky", "broken"] {
        for r in history.fetch(id).await {
            println!("  {id} attempt {}: output={:?} error={:?}", r.attempt, r.output, r.error);
        }
    }

    pool.shutdown().await?;
    Ok(())
}
