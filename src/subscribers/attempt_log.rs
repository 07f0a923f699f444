//! # Per-identity attempt log.
//!
//! [`AttemptLog`] records the start and end of every attempt, with its output
//! or error, and answers [`fetch`](AttemptLog::fetch) for one identity.
//! Records are kept in memory; with [`AttemptLog::with_file`] each start and
//! end is also appended as one line to a log file:
//!
//! ```text
//! 2026-01-05T10:00:00.000Z task=report attempt=1 start
//! 2026-01-05T10:00:02.310Z task=report attempt=1 end error="error: exit status 2"
//! 2026-01-05T10:00:03.320Z task=report attempt=2 start
//! 2026-01-05T10:00:04.001Z task=report attempt=2 end output="done"
//! ```
//!
//! File writes are best-effort: failures are logged and never reach the pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// One attempt of one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: SystemTime,
    /// `None` while the attempt is running.
    pub ended_at: Option<SystemTime>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// In-memory (and optionally file-backed) attempt history.
#[derive(Default)]
pub struct AttemptLog {
    records: Mutex<HashMap<String, Vec<AttemptRecord>>>,
    file: Option<PathBuf>,
}

impl AttemptLog {
    /// Memory-only log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also appends a line per start/end to `path`.
    pub fn with_file(path: impl AsRef<Path>) -> Self {
        Self {
            records: Mutex::default(),
            file: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Attempts recorded for `id`, oldest first.
    pub async fn fetch(&self, id: &str) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, ev: &Event) {
        let Some(id) = ev.task.as_deref() else {
            return;
        };
        let attempt = ev.attempt.unwrap_or(0);

        let line = {
            let mut records = self.records.lock().await;
            let history = records.entry(id.to_string()).or_default();
            match ev.kind {
                EventKind::TaskStarting => {
                    history.push(AttemptRecord {
                        attempt,
                        started_at: ev.at,
                        ended_at: None,
                        output: None,
                        error: None,
                    });
                    format!("task={id} attempt={attempt} start")
                }
                EventKind::TaskStopped | EventKind::TaskFailed => {
                    let Some(last) = history.iter_mut().rev().find(|r| r.attempt == attempt) else {
                        return;
                    };
                    last.ended_at = Some(ev.at);
                    if ev.kind == EventKind::TaskStopped {
                        let output = ev.output.as_deref().unwrap_or_default().to_string();
                        let line = format!("task={id} attempt={attempt} end output={output:?}");
                        last.output = Some(output);
                        line
                    } else {
                        let error = ev.reason.as_deref().unwrap_or_default().to_string();
                        let line = format!("task={id} attempt={attempt} end error={error:?}");
                        last.error = Some(error);
                        line
                    }
                }
                _ => return,
            }
        };

        if let Some(path) = &self.file {
            let stamp = DateTime::<Utc>::from(ev.at).to_rfc3339_opts(SecondsFormat::Millis, true);
            if let Err(e) = append_line(path, &format!("{stamp} {line}\n")).await {
                warn!(path = %path.display(), error = %e, "attempt log write failed");
            }
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

#[async_trait]
impl Subscribe for AttemptLog {
    async fn on_event(&self, ev: &Event) {
        self.record(ev).await;
    }

    fn name(&self) -> &'static str {
        "attempt-log"
    }
}
