//! Running external programs to completion.
//!
//! [`CommandRunner`] is the seam every transport operation goes through.
//! [`ProcessRunner`] is the real implementation on top of `tokio::process`.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use protocol::CommandResult;
use tokio::process::Command;

use crate::error::{ControlError, Result};

/// Executes an external program and captures its output.
///
/// Implementations must be stateless between calls so that concurrent
/// calls never observe each other.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` until it exits.
    ///
    /// # Errors
    /// * [`ControlError::Execution`] if the program cannot be spawned or awaited.
    /// * [`ControlError::Timeout`] if `timeout` elapses first; the process is killed.
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<CommandResult>> + Send;
}

/// Runs programs as OS child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::Execution {
                program: program.to_path_buf(),
                source,
            })?;

        tracing::trace!(program = %program.display(), ?args, pid = ?child.id(), "Spawned command");

        // Dropping the wait future on timeout drops the child, and
        // kill_on_drop makes tokio kill and reap it.
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!(
                        program = %program.display(),
                        ?args,
                        timeout = ?limit,
                        "Command timed out, killed"
                    );
                    return Err(ControlError::Timeout {
                        program: program.to_path_buf(),
                        after: limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ControlError::Execution {
            program: program.to_path_buf(),
            source,
        })?;

        let result = CommandResult::new(
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
            output.status.code().unwrap_or(CommandResult::KILLED),
        );

        tracing::debug!(
            program = %program.display(),
            ?args,
            exit_code = result.exit_code,
            "Command finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn script(s: &str) -> Vec<String> {
        vec!["-c".to_string(), s.to_string()]
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_captures_stdout_and_exit_code() {
        let result = ProcessRunner::new()
            .run(&sh(), &script("echo hello"), None)
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
        assert!(result.success());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_captures_streams_independently() {
        let result = ProcessRunner::new()
            .run(&sh(), &script("echo out; echo err >&2; exit 3"), None)
            .await
            .unwrap();

        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_passes_args_verbatim() {
        let args = vec![
            "-c".to_string(),
            "printf '%s|' \"$@\"".to_string(),
            "sh".to_string(),
            "su -c 'id'".to_string(),
            "two words".to_string(),
        ];
        let result = ProcessRunner::new().run(&sh(), &args, None).await.unwrap();

        assert_eq!(result.stdout, "su -c 'id'|two words|");
    }

    #[tokio::test]
    async fn test_run_missing_program_is_execution_error() {
        let result = ProcessRunner::new()
            .run(Path::new("/nonexistent/bin/adb"), &[], None)
            .await;

        assert!(matches!(result, Err(ControlError::Execution { .. })));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_timeout_kills_process() {
        let started = Instant::now();
        let result = ProcessRunner::new()
            .run(
                &sh(),
                &script("exec sleep 30"),
                Some(Duration::from_millis(200)),
            )
            .await;

        assert!(matches!(result, Err(ControlError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_within_timeout_succeeds() {
        let result = ProcessRunner::new()
            .run(&sh(), &script("echo quick"), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(result.stdout, "quick\n");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_killed_by_signal_reports_sentinel() {
        let result = ProcessRunner::new()
            .run(&sh(), &script("kill -9 $$"), None)
            .await
            .unwrap();

        assert!(result.was_killed());
    }
}
