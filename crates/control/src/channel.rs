//! Ad-hoc remote shell commands.
//!
//! The command channel backs the terminal and diagnostic features: it runs a
//! command line in a connected device's shell, optionally elevated, and
//! hands back whatever the device printed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use protocol::{transport, CommandResult, DeviceId};

use crate::error::{ControlError, Result};
use crate::runner::CommandRunner;

/// Runs shell commands on connected devices through the transport.
pub struct CommandChannel<R> {
    runner: Arc<R>,
    adb_path: PathBuf,
    default_timeout: Option<Duration>,
}

impl<R: CommandRunner> CommandChannel<R> {
    /// Creates a command channel using an already resolved transport path.
    pub fn new(runner: Arc<R>, adb_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            adb_path: adb_path.into(),
            default_timeout: None,
        }
    }

    /// Sets the timeout used when `execute` is not given one.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Runs `command_line` in the shell of `device_id`.
    ///
    /// With `use_root` the command line is wrapped once in the elevation
    /// invocation. It is otherwise passed through verbatim, so quoting for
    /// the remote shell is up to the caller.
    ///
    /// Remote failures come back as a non-zero `exit_code`. A command that
    /// outlives the timeout is killed and reported with exit code
    /// [`CommandResult::KILLED`].
    ///
    /// # Errors
    /// [`ControlError::Execution`] if the transport itself cannot be run.
    pub async fn execute(
        &self,
        device_id: &DeviceId,
        command_line: &str,
        use_root: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let args = transport::shell_args(device_id, command_line, use_root);
        let timeout = timeout.or(self.default_timeout);

        tracing::debug!(
            device_id = %device_id,
            command = command_line,
            use_root,
            "Executing remote command"
        );

        match self.runner.run(&self.adb_path, &args, timeout).await {
            Ok(result) => {
                if !result.success() {
                    tracing::debug!(
                        device_id = %device_id,
                        exit_code = result.exit_code,
                        stderr = %result.stderr.trim(),
                        "Remote command failed"
                    );
                }
                Ok(result)
            }
            Err(ControlError::Timeout { after, .. }) => {
                tracing::warn!(device_id = %device_id, command = command_line, ?after, "Remote command timed out");
                Ok(CommandResult::killed(format!(
                    "command timed out after {after:?}"
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn device() -> DeviceId {
        DeviceId::new("192.168.1.100:5555")
    }

    fn channel(runner: &Arc<ScriptedRunner>) -> CommandChannel<ScriptedRunner> {
        CommandChannel::new(Arc::clone(runner), "/opt/tools/adb")
    }

    #[tokio::test]
    async fn test_execute_plain_command() {
        let runner = Arc::new(
            ScriptedRunner::new().on("shell", CommandResult::new("sdcard\nsystem\n", "", 0)),
        );

        let result = channel(&runner)
            .execute(&device(), "ls /", false, None)
            .await
            .unwrap();

        assert_eq!(result.stdout, "sdcard\nsystem\n");
        assert_eq!(
            runner.calls(),
            vec![vec![
                "-s".to_string(),
                "192.168.1.100:5555".to_string(),
                "shell".to_string(),
                "ls /".to_string(),
            ]]
        );
    }

    #[tokio::test]
    async fn test_execute_root_wraps_exactly_once() {
        let runner = Arc::new(
            ScriptedRunner::new().on("shell", CommandResult::new("uid=0(root)\n", "", 0)),
        );
        let channel = channel(&runner);

        for _ in 0..3 {
            channel.execute(&device(), "id", true, None).await.unwrap();
        }

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        for call in calls {
            assert_eq!(call[3], "su -c 'id'");
        }
    }

    #[tokio::test]
    async fn test_execute_remote_failure_is_a_result() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "shell",
            CommandResult::new("", "ls: /data: Permission denied\n", 1),
        ));

        let result = channel(&runner)
            .execute(&device(), "ls /data", false, None)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_execute_transport_missing_is_error() {
        let runner = Arc::new(ScriptedRunner::new().failing());

        let result = channel(&runner).execute(&device(), "ls", false, None).await;

        assert!(matches!(result, Err(ControlError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_execute_timeout_is_killed_result() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("shell", CommandResult::new("never", "", 0))
                .with_delay(Duration::from_secs(5)),
        );

        let result = channel(&runner)
            .execute(&device(), "top", false, Some(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(result.was_killed());
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_uses_default_timeout() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("shell", CommandResult::new("never", "", 0))
                .with_delay(Duration::from_secs(5)),
        );
        let channel = channel(&runner).with_default_timeout(Some(Duration::from_millis(50)));

        let result = channel.execute(&device(), "logcat", false, None).await.unwrap();

        assert!(result.was_killed());
    }
}
