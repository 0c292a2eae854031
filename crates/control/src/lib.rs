//! # mirrorctl Control Library
//!
//! This crate drives network-attached Android devices through the transport
//! binary and supervises screen-mirroring server processes for them.
//!
//! ## Overview
//!
//! - **Connections**: TCP reachability probing and the per-address
//!   connect/disconnect lifecycle
//! - **Sessions**: one supervised mirroring process per device, with its
//!   output exposed as a line stream
//! - **Commands**: ad-hoc shell commands on a device, optionally elevated
//! - **Controller**: resolves the executables once and wires everything
//!   together from a [`Config`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Controller                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌───────────────────┐  ┌──────────────┐  ┌───────────┐  │
//! │  │ ConnectionManager │  │CommandChannel│  │  Session  │  │
//! │  │                   │  │              │  │Orchestrator│ │
//! │  └─────────┬─────────┘  └──────┬───────┘  └─────┬─────┘  │
//! │            └─────── CommandRunner ──────┘       │        │
//! │                    (transport binary)    (server process)│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use control::{Config, Controller};
//! use protocol::SessionOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = Controller::new(Config::load_default()?)?;
//!
//!     let address = controller.parse_address("192.168.1.100")?;
//!     if controller.connect(&address).await.is_connected() {
//!         let session = controller
//!             .start(&address.device_id(), SessionOptions::default())
//!             .await?;
//!         let mut output = session.output();
//!         while let Some(line) = output.next_line().await {
//!             println!("{line}");
//!         }
//!     }
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`connection`]: Reachability probing and connection lifecycle
//! - [`session`]: Mirroring session supervision
//! - [`channel`]: Remote shell commands
//! - [`runner`]: External program execution
//! - [`provision`]: Executable resolution
//! - [`controller`]: Main coordinator

pub mod channel;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod provision;
pub mod runner;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export protocol for convenience
pub use protocol;

pub use channel::CommandChannel;
pub use config::{Config, ConfigError};
pub use connection::{probe_reachable, ConnectionEvent, ConnectionManager};
pub use controller::Controller;
pub use error::{ControlError, Result};
pub use provision::{AssetProvisioner, PathProvisioner};
pub use runner::{CommandRunner, ProcessRunner};
pub use session::{Session, SessionEvent, SessionId, SessionOrchestrator, SessionOutput};
