//! Error types for the control plane.
//!
//! Only local failures are errors. Remote-side failures (an unreachable
//! device, a refused connect, a non-zero remote exit) are reported as
//! ordinary values by the operation that observed them.

use std::path::PathBuf;
use std::time::Duration;

use protocol::DeviceId;
use thiserror::Error;

/// Errors that can occur in control plane operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// A required executable could not be resolved. The owning component is
    /// unavailable until it is reconstructed.
    #[error("{name} executable unavailable: {reason}")]
    Setup {
        /// Logical executable name.
        name: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The process could not be spawned or awaited.
    #[error("failed to run {}: {source}", program.display())]
    Execution {
        /// Program that was being run.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process did not exit within the caller's timeout and was killed.
    #[error("{} timed out after {after:?}", program.display())]
    Timeout {
        /// Program that was being run.
        program: PathBuf,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// A mirroring session is already active for the device.
    #[error("session already running for device {0}")]
    SessionConflict(DeviceId),

    /// Session options were rejected before spawning.
    #[error("invalid session options: {0}")]
    InvalidOptions(#[from] protocol::ProtocolError),
}

impl ControlError {
    /// Creates a setup error for the named executable.
    pub fn setup(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Setup {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by local configuration rather than a
    /// single failed call.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}

/// Result type alias for control plane operations.
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display() {
        let err = ControlError::setup("adb", "not found in PATH");
        assert_eq!(err.to_string(), "adb executable unavailable: not found in PATH");
        assert!(err.is_setup());
    }

    #[test]
    fn test_execution_error_display_and_source() {
        let err = ControlError::Execution {
            program: PathBuf::from("/opt/tools/adb"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.to_string(), "failed to run /opt/tools/adb: no such file");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_setup());
    }

    #[test]
    fn test_timeout_error_display() {
        let err = ControlError::Timeout {
            program: PathBuf::from("adb"),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "adb timed out after 5s");
    }

    #[test]
    fn test_session_conflict_display() {
        let err = ControlError::SessionConflict(DeviceId::new("192.168.1.100:5555"));
        assert_eq!(
            err.to_string(),
            "session already running for device 192.168.1.100:5555"
        );
    }

    #[test]
    fn test_invalid_options_from_protocol_error() {
        let err: ControlError = protocol::ProtocolError::ZeroBitRate.into();
        assert!(matches!(err, ControlError::InvalidOptions(_)));
        assert!(err.to_string().contains("bit rate"));
    }
}
