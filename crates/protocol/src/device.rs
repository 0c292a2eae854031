//! Device addressing and connection lifecycle.
//!
//! A [`DeviceAddress`] names a network endpoint before a connection exists.
//! Once the transport has connected to it, the device is addressed by its
//! [`DeviceId`], which for network-attached devices is the `host:port` string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Standard TCP port the transport daemon listens on for network debugging.
pub const DEFAULT_PORT: u16 = 5555;

/// A network endpoint identifying a device before it is connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    host: String,
    port: u16,
}

impl DeviceAddress {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port` or `[v6-host]:port`.
    ///
    /// When no port is given, `default_port` is used.
    pub fn parse_with_default(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ProtocolError::UnterminatedBracket(input.to_string()))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| ProtocolError::InvalidPort(input.to_string()))?,
                ),
            };
            (host, port)
        } else {
            match input.rsplit_once(':') {
                // A bare IPv6 literal has several colons and no port.
                Some((host, _)) if host.contains(':') => (input, None),
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        if host.is_empty() {
            return Err(ProtocolError::MissingHost(input.to_string()));
        }

        let port = match port {
            None => default_port,
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => return Err(ProtocolError::InvalidPort(input.to_string())),
                Ok(port) => port,
            },
        };

        Ok(Self::new(host, port))
    }

    /// Returns the host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the identifier the transport uses once this address is connected.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from(self)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_default(s, DEFAULT_PORT)
    }
}

/// The key a connected device is addressed by for all per-device operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a transport identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&DeviceAddress> for DeviceId {
    fn from(address: &DeviceAddress) -> Self {
        Self(address.to_string())
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection lifecycle of a device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Address has been referenced but no connect was requested yet.
    #[default]
    Unknown,
    /// TCP reachability probe in progress.
    Probing,
    /// Probe failed; the transport was not invoked.
    Unreachable,
    /// Transport connect subcommand in progress.
    Connecting,
    /// Probe and connect subcommand both succeeded.
    Connected,
    /// Connect subcommand failed or did not report success.
    ConnectFailed,
    /// Explicitly disconnected.
    Disconnected,
}

impl ConnectionState {
    /// Returns true while a connect attempt is still in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Probing | Self::Connecting)
    }

    /// Returns true if the device can be addressed by its [`DeviceId`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Probing => "probing",
            Self::Unreachable => "unreachable",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect failed",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}
