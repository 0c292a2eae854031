//! Result of running one external command.

use serde::{Deserialize, Serialize};

/// Captured output and exit status of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Everything the process wrote to stdout.
    pub stdout: String,
    /// Everything the process wrote to stderr.
    pub stderr: String,
    /// Exit code, or [`CommandResult::KILLED`] if the process did not exit on its own.
    pub exit_code: i32,
}

impl CommandResult {
    /// Sentinel exit code for a process terminated by a signal, a timeout or a cancellation.
    pub const KILLED: i32 = -1;

    /// Creates a result from captured output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Creates a result for a process that was killed before exiting.
    pub fn killed(stderr: impl Into<String>) -> Self {
        Self::new(String::new(), stderr, Self::KILLED)
    }

    /// Returns true if the process exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns true if the process was killed rather than exiting.
    pub fn was_killed(&self) -> bool {
        self.exit_code == Self::KILLED
    }

    /// Returns stdout followed by stderr.
    ///
    /// The transport prints some status messages on stderr depending on
    /// its version, so textual checks look at both streams.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_only_on_zero() {
        assert!(CommandResult::new("", "", 0).success());
        assert!(!CommandResult::new("", "", 1).success());
        assert!(!CommandResult::killed("timed out").success());
    }

    #[test]
    fn test_killed_sentinel() {
        let result = CommandResult::killed("timed out after 5s");
        assert!(result.was_killed());
        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_combined_output() {
        let result = CommandResult::new("out", "err\n", 0);
        assert_eq!(result.combined_output(), "out\nerr\n");

        let result = CommandResult::new("out\n", "", 0);
        assert_eq!(result.combined_output(), "out\n");

        let result = CommandResult::new("", "only err", 1);
        assert_eq!(result.combined_output(), "only err");
    }
}
