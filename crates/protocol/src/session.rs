//! Mirroring session lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one mirroring session.
///
/// `Stopped` and `Failed` are terminal and record the process exit code,
/// which is `None` when the process was terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionState {
    /// No session exists for the device.
    #[default]
    Idle,
    /// Process is being spawned.
    Starting,
    /// Process is alive.
    Running,
    /// Termination was requested and is in progress.
    Stopping,
    /// Process exited cleanly or was stopped on request.
    Stopped { exit_code: Option<i32> },
    /// Process exited on its own with a failure, or could not be awaited.
    Failed { exit_code: Option<i32> },
}

impl SessionState {
    /// Returns true once the process is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::Failed { .. })
    }

    /// Returns true while the session holds a live process.
    ///
    /// A starting, running or stopping session blocks a new start for the
    /// same device.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Returns the recorded exit code of a terminal state.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Stopped { exit_code } | Self::Failed { exit_code } => *exit_code,
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped { exit_code: Some(code) } => write!(f, "stopped (exit {code})"),
            Self::Stopped { exit_code: None } => f.write_str("stopped"),
            Self::Failed { exit_code: Some(code) } => write!(f, "failed (exit {code})"),
            Self::Failed { exit_code: None } => f.write_str("failed"),
        }
    }
}
