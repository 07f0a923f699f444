//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes when the process is asked to stop and
//! reports which signal arrived, so [`WorkerPool::run`](crate::WorkerPool::run)
//! can log it before draining.
//!
//! - Unix: `SIGINT`, `SIGTERM`, `SIGQUIT`, Ctrl-C
//! - elsewhere: Ctrl-C

/// Waits for a termination signal and returns its name.
///
/// Fails only if a signal listener cannot be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = tokio::signal::ctrl_c() => "ctrl-c",
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Waits for a termination signal and returns its name.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
