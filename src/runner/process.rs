//! # Interpreter-backed runner.
//!
//! [`ProcessRunner`] runs `<interpreter> <script-file> <args...>`:
//!
//! ```text
//! execute(payload)
//!   ├─ stage: tempdir "scriptvisor_*" / <script_name>      (Fatal on failure)
//!   ├─ spawn: interpreter, stdout+stderr piped, kill_on_drop (Fatal on failure)
//!   └─ select!
//!        ├─ child exited   ─► Ok(output) | ExecutionFailed (non-zero exit)
//!        ├─ cancel fired   ─► child killed ─► Canceled
//!        └─ timeout elapsed ─► child killed ─► TimedOut
//! ```
//!
//! Output is stdout followed by stderr. The temp directory is removed when the
//! attempt ends, whichever branch finished it.
//!
//! With a virtual environment the interpreter is `<venv>/bin/<interpreter>`,
//! `VIRTUAL_ENV` is set and `<venv>/bin` is prepended to `PATH`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::{fs, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::tasks::Payload;

use super::ScriptRunner;

/// Runs scripts as child processes of an interpreter.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    interpreter: String,
    script_name: String,
    venv: Option<PathBuf>,
}

impl ProcessRunner {
    /// Runner for `interpreter` (looked up on `PATH`).
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script_name: "script".to_string(),
            venv: None,
        }
    }

    /// `python3` runner staging scripts as `script.py`.
    pub fn python() -> Self {
        Self::new("python3").with_script_name("script.py")
    }

    /// File name the script is staged under.
    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Runs inside the virtual environment at `dir`.
    pub fn with_venv(mut self, dir: impl AsRef<Path>) -> Self {
        self.venv = Some(dir.as_ref().to_path_buf());
        self
    }

    fn command(&self, script: &Path, args: &[String]) -> Command {
        let mut cmd = match &self.venv {
            Some(venv) => {
                let bin = venv.join("bin");
                let mut path = OsString::from(bin.as_os_str());
                if let Some(current) = std::env::var_os("PATH") {
                    path.push(":");
                    path.push(current);
                }
                let mut cmd = Command::new(bin.join(&self.interpreter));
                cmd.env("VIRTUAL_ENV", venv).env("PATH", path);
                cmd
            }
            None => Command::new(&self.interpreter),
        };
        cmd.arg(script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn execute(
        &self,
        payload: &Payload,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, RunError> {
        let staging = tempfile::Builder::new()
            .prefix("scriptvisor_")
            .tempdir()
            .map_err(|e| RunError::Fatal {
                error: format!("failed to create staging dir: {e}"),
            })?;
        let script = staging.path().join(&self.script_name);
        fs::write(&script, payload.script.as_bytes())
            .await
            .map_err(|e| RunError::Fatal {
                error: format!("failed to stage script: {e}"),
            })?;

        debug!(
            interpreter = %self.interpreter,
            script = %script.display(),
            args = payload.args.len(),
            ?timeout,
            "spawning script"
        );
        let child = self
            .command(&script, &payload.args)
            .spawn()
            .map_err(|e| RunError::Fatal {
                error: format!("failed to spawn {}: {e}", self.interpreter),
            })?;

        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|e| RunError::ExecutionFailed {
                error: format!("wait failed: {e}"),
            })?,
            _ = cancel.cancelled() => {
                debug!(script = %script.display(), "script cancelled; child killed");
                return Err(RunError::Canceled);
            }
            _ = time::sleep(timeout) => {
                warn!(script = %script.display(), ?timeout, "script timed out; child killed");
                return Err(RunError::TimedOut { timeout });
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(text)
        } else {
            debug!(status = %output.status, "script exited with failure");
            let detail = text.trim();
            Err(RunError::ExecutionFailed {
                error: if detail.is_empty() {
                    output.status.to_string()
                } else {
                    format!("{}: {detail}", output.status)
                },
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> ProcessRunner {
        ProcessRunner::new("sh").with_script_name("script.sh")
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let payload = Payload::new("echo out \"$1\"; echo err >&2").with_args(["x"]);
        let out = sh()
            .execute(&payload, Duration::from_secs(5), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "out x\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_execution_failure() {
        let err = sh()
            .execute(&Payload::new("echo broken; exit 3"), Duration::from_secs(5), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RunError::ExecutionFailed { error } => assert!(error.contains("broken")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_interpreter_is_fatal() {
        let err = ProcessRunner::new("definitely-not-an-interpreter")
            .execute(&Payload::new(""), Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Fatal { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn timeout_kills_script() {
        let started = std::time::Instant::now();
        let err = sh()
            .execute(&Payload::new("sleep 10"), Duration::from_millis(100), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, RunError::TimedOut { timeout: Duration::from_millis(100) });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_stops_script() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = sh()
            .execute(&Payload::new("sleep 10"), Duration::from_secs(30), token)
            .await
            .unwrap_err();
        assert_eq!(err, RunError::Canceled);
    }

    #[tokio::test]
    async fn venv_sets_environment() {
        let venv = tempfile::tempdir().unwrap();
        let bin = venv.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        std::os::unix::fs::symlink("/bin/sh", bin.join("sh")).unwrap();

        let out = sh()
            .with_venv(venv.path())
            .execute(&Payload::new("echo \"$VIRTUAL_ENV\""), Duration::from_secs(5), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.trim(), venv.path().display().to_string());
    }
}
