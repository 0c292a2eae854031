//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed addresses and session options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Address errors
    /// The address string has no host part.
    #[error("invalid device address: missing host in {0:?}")]
    MissingHost(String),

    /// The port is not a number in 1..=65535.
    #[error("invalid device address: bad port in {0:?}")]
    InvalidPort(String),

    /// A bracketed IPv6 host was not closed.
    #[error("invalid device address: unterminated IPv6 bracket in {0:?}")]
    UnterminatedBracket(String),

    // Session option errors
    /// Bit rate must be at least 1 Mbps.
    #[error("bit rate must be greater than 0")]
    ZeroBitRate,

    /// Resolution hint must be at least 1 pixel.
    #[error("resolution hint must be greater than 0")]
    ZeroResolution,

    /// Crop region is not shaped `width:height:x:y`.
    #[error("crop region must be width:height:x:y, got {0:?}")]
    InvalidCrop(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
