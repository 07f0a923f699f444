//! # Example: basic_pool
//!
//! Two workers, five closure-backed tasks with different priorities. The
//! highest priorities run first; completions arrive on a channel and the
//! [`LogWriter`] prints the lifecycle through `tracing`.
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example basic_pool
//! ```

use std::sync::Arc;
use std::time::Duration;

use scriptvisor::{
    Config, LogWriter, Payload, RunError, RunnerFn, Subscribe, Task, TaskMonitor, WorkerPool,
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
        ..Config::default()
    };

    let monitor = Arc::new(TaskMonitor::new());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter), monitor.clone()];
    let (tx, mut done) = mpsc::unbounded_channel();

    let pool = WorkerPool::builder(cfg)
        .with_runner(RunnerFn::arc(|p: Payload, cancel: CancellationToken| async move {
            let millis: u64 = p.args.first().and_then(|a| a.parse().ok()).unwrap_or(100);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(format!("{} done", p.script)),
                _ = cancel.cancelled() => Err(RunError::Canceled),
            }
        }))
        .with_subscribers(subs)
        .with_completions(tx)
        .build();

    // Submit before starting so priorities decide the order.
    for (id, priority) in [("a", 1), ("b", 5), ("c", 3), ("d", 5), ("e", 0)] {
        let payload = Payload::new(format!("job-{id}")).with_args(["200"]);
        pool.submit(Task::builder(id, payload).with_priority(priority).build())
            .await?;
    }
    pool.start().await?;

    for _ in 0..5 {
        if let Some(c) = done.recv().await {
            println!("{:<2} {:<10} {:?}", c.task_id(), c.outcome.as_label(), c.result.elapsed());
        }
    }
    println!("stats: {:?}", pool.stats().await);

    pool.shutdown().await?;
    Ok(())
}
