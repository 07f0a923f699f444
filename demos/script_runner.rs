//! # Example: script_runner
//!
//! Runs real shell scripts through [`ProcessRunner`], with one script that
//! overruns its timeout, and persists task states with [`JsonFileStore`].
//! Run it twice to see the previous run's states recovered.
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example script_runner
//! ```

use std::sync::Arc;
use std::time::Duration;

use scriptvisor::{
    Config, JsonFileStore, LogWriter, Payload, ProcessRunner, Subscribe, Task, WorkerPool,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    scriptvisor::load_dotenv();

    let cfg = Config {
        max_retries: 1,
        retry_interval: Duration::from_millis(100),
        reclaim_grace: Duration::from_millis(500),
        ..Config::from_env()
    };

    let state_dir = std::env::temp_dir().join("scriptvisor-demo");
    std::fs::create_dir_all(&state_dir)?;
    let store = Arc::new(JsonFileStore::new(&state_dir));

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let (tx, mut done) = mpsc::unbounded_channel();
    let pool = WorkerPool::builder(cfg.clone())
        .with_runner(Arc::new(ProcessRunner::new("sh").with_script_name("script.sh")))
        .with_subscribers(subs)
        .with_recovery(store.clone())
        .with_completions(tx)
        .build();
    pool.start().await?;

    let previous = pool.recovered().await;
    if !previous.is_empty() {
        println!("recovered from {}:", store.path().display());
        for (id, state) in &previous {
            println!("  {id}: {} at {}", state.state, state.updated_at);
        }
    }

    let tasks = [
        Task::builder("greet", Payload::new("echo \"hello $1\"").with_args(["world"]))
            .with_defaults(&cfg)
            .build(),
        Task::builder("fail", Payload::new("echo nope >&2; exit 2"))
            .with_defaults(&cfg)
            .build(),
        Task::builder("slow", Payload::new("sleep 5"))
            .with_defaults(&cfg)
            .with_timeout(Duration::from_millis(300))
            .build(),
    ];
    let n = tasks.len();
    for task in tasks {
        pool.submit(task).await?;
    }

    for _ in 0..n {
        if let Some(c) = done.recv().await {
            let detail = match &c.result.error {
                Some(e) => e.to_string(),
                None => c.result.output.trim().to_string(),
            };
            println!("{:<6} {:<10} {detail}", c.task_id(), c.outcome.as_label());
        }
    }

    pool.shutdown().await?;
    Ok(())
}
