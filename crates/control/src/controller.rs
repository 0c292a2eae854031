//! Controller for wiring together all components.
//!
//! This module provides the [`Controller`] that resolves the external
//! executables once, builds the connection manager, session orchestrator and
//! command channel from a [`Config`], and exposes them as one API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    CommandResult, ConnectionState, DeviceAddress, DeviceId, SessionOptions, SessionState,
};
use tokio::sync::broadcast;

use crate::channel::CommandChannel;
use crate::config::Config;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::error::{ControlError, Result};
use crate::provision::{self, AssetProvisioner, PathProvisioner};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::session::{Session, SessionEvent, SessionOrchestrator, SessionOutput};

/// Entry point to the control plane.
pub struct Controller<R = ProcessRunner> {
    /// Configuration.
    config: Config,
    /// Connection lifecycle per address.
    connections: ConnectionManager<R>,
    /// Remote shell commands.
    commands: CommandChannel<R>,
    /// Mirroring sessions per device.
    sessions: SessionOrchestrator,
    /// Whether the mirroring server resolved at construction.
    server_available: bool,
}

impl Controller<ProcessRunner> {
    /// Creates a controller that resolves executables from `PATH`.
    ///
    /// # Errors
    /// [`ControlError::Setup`] if the transport executable cannot be resolved.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_provisioner(config, &PathProvisioner)
    }

    /// Creates a controller that resolves executables through `provisioner`.
    pub fn with_provisioner(config: Config, provisioner: &dyn AssetProvisioner) -> Result<Self> {
        Self::with_runner(config, provisioner, ProcessRunner::new())
    }
}

impl<R: CommandRunner> Controller<R> {
    /// Creates a controller that runs transport commands through `runner`.
    ///
    /// A missing transport is fatal. A missing mirroring server only
    /// disables `start`, which then fails with [`ControlError::Setup`].
    pub fn with_runner(
        config: Config,
        provisioner: &dyn AssetProvisioner,
        runner: R,
    ) -> Result<Self> {
        let adb_path = provision::resolve(provisioner, &config.transport.adb_path)?;

        let (server_path, server_available) =
            match provision::resolve(provisioner, &config.session.server_path) {
                Ok(path) => (path, true),
                Err(e) => {
                    tracing::warn!(error = %e, "Mirroring server unavailable, sessions disabled");
                    (PathBuf::from(&config.session.server_path), false)
                }
            };

        let runner = Arc::new(runner);
        let command_timeout = config.transport.command_timeout();

        let connections = ConnectionManager::new(Arc::clone(&runner), adb_path.clone())
            .with_probe_timeout(config.transport.probe_timeout())
            .with_command_timeout(command_timeout);

        let commands = CommandChannel::new(Arc::clone(&runner), adb_path.clone())
            .with_default_timeout(command_timeout);

        let sessions = SessionOrchestrator::new(server_path, adb_path)
            .with_leading_args(config.session.server_args.clone())
            .with_stop_grace(config.session.stop_grace())
            .with_output_capacity(config.session.output_buffer_lines);

        tracing::info!(
            adb_path = %connections.adb_path().display(),
            server_path = %sessions.server_path().display(),
            server_available,
            "Controller ready"
        );

        Ok(Self {
            config,
            connections,
            commands,
            sessions,
            server_available,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parses a device address, applying the configured default port.
    pub fn parse_address(&self, input: &str) -> protocol::Result<DeviceAddress> {
        DeviceAddress::parse_with_default(input, self.config.transport.default_port)
    }

    /// Checks whether `address` accepts TCP connections within the
    /// configured probe timeout.
    pub async fn probe_reachable(&self, address: &DeviceAddress) -> bool {
        self.connections
            .probe_reachable(address, self.config.transport.probe_timeout())
            .await
    }

    /// Connects the transport to `address`.
    pub async fn connect(&self, address: &DeviceAddress) -> ConnectionState {
        self.connections.connect(address).await
    }

    /// Disconnects the transport from `address`.
    pub async fn disconnect(&self, address: &DeviceAddress) -> bool {
        self.connections.disconnect(address).await
    }

    /// Returns the connection state of `address`.
    pub async fn connection_state(&self, address: &DeviceAddress) -> ConnectionState {
        self.connections.state(address).await
    }

    /// Lists the devices the transport reports as online.
    pub async fn list_connected(&self) -> Vec<DeviceId> {
        self.connections.list_connected().await
    }

    /// Checks whether `device_id` grants superuser elevation.
    pub async fn has_root_access(&self, device_id: &DeviceId) -> bool {
        self.connections.has_root_access(device_id).await
    }

    /// Runs a shell command on `device_id`.
    ///
    /// Without a `timeout` the configured command timeout applies.
    pub async fn execute(
        &self,
        device_id: &DeviceId,
        command_line: &str,
        use_root: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        self.commands
            .execute(device_id, command_line, use_root, timeout)
            .await
    }

    /// Starts a mirroring session for `device_id`.
    ///
    /// Fields left unset in `options` are taken from the configured
    /// session defaults.
    pub async fn start(&self, device_id: &DeviceId, options: SessionOptions) -> Result<Arc<Session>> {
        if !self.server_available {
            return Err(ControlError::setup(
                &self.config.session.server_path,
                "not found or not executable",
            ));
        }
        let options = options.or(&self.config.session.defaults);
        self.sessions.start(device_id, options).await
    }

    /// Stops the mirroring session for `device_id`, if any.
    pub async fn stop(&self, device_id: &DeviceId) -> Result<()> {
        self.sessions.stop(device_id).await
    }

    /// Returns the state of the session for `device_id`.
    pub async fn session_state(&self, device_id: &DeviceId) -> SessionState {
        self.sessions.state(device_id).await
    }

    /// Returns the current session for `device_id`.
    pub async fn session(&self, device_id: &DeviceId) -> Option<Arc<Session>> {
        self.sessions.get(device_id).await
    }

    /// Lists all current sessions.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.list().await
    }

    /// Returns the output of the session for `device_id`.
    ///
    /// The first caller gets the output from its first line, later callers
    /// get lines produced from then on. Once a session has exited and been
    /// retired this is `None`; the handle returned by `start` still holds
    /// its buffered output.
    pub async fn subscribe_output(&self, device_id: &DeviceId) -> Option<SessionOutput> {
        self.sessions
            .get(device_id)
            .await
            .map(|session| session.output())
    }

    /// Subscribes to connection state transitions.
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connections.subscribe()
    }

    /// Subscribes to session state transitions.
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    /// Stops every live session.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down controller");
        self.sessions.stop_all().await;
    }
}
