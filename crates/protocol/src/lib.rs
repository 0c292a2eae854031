//! # mirrorctl Protocol Library
//!
//! This crate holds the data model of the mirrorctl control plane and the
//! textual protocol it speaks with two third-party executables:
//!
//! - the **transport** binary, a network debugging client used to connect to
//!   devices, list them and run shell commands on them;
//! - the **mirroring server**, a long-running process that mirrors one
//!   device's screen.
//!
//! Nothing here spawns processes or touches the network. Argument vectors are
//! built and output is parsed as plain strings, so every rule can be tested
//! without a device.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{transport, DeviceAddress, SessionOptions};
//!
//! let address: DeviceAddress = "192.168.1.100".parse().unwrap();
//! assert_eq!(transport::connect_args(&address), ["connect", "192.168.1.100:5555"]);
//!
//! let options = SessionOptions { bit_rate_mbps: Some(16), ..Default::default() };
//! let args = options.to_args(&address.device_id());
//! assert_eq!(args, ["-s", "192.168.1.100:5555", "-b", "16M"]);
//! ```
//!
//! ## Modules
//!
//! - [`device`]: Device addresses, identifiers and connection states
//! - [`options`]: Session options and server argument rendering
//! - [`session`]: Session lifecycle states
//! - [`result`]: Captured command output
//! - [`transport`]: Transport subcommands and output parsing
//! - [`error`]: Error types

pub mod device;
pub mod error;
pub mod options;
pub mod result;
pub mod session;
pub mod transport;

pub use device::{ConnectionState, DeviceAddress, DeviceId, DEFAULT_PORT};
pub use error::{ProtocolError, Result};
pub use options::{format_bit_rate, SessionOptions};
pub use result::CommandResult;
pub use session::SessionState;
