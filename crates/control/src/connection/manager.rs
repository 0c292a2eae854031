//! Connection manager for device addresses.
//!
//! This module tracks the [`ConnectionState`] of every address the caller has
//! referenced and drives the transport's connect, disconnect, devices and
//! root-check subcommands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::{transport, ConnectionState, DeviceAddress, DeviceId};
use tokio::sync::{broadcast, Mutex};

use super::probe::{probe_reachable, DEFAULT_PROBE_TIMEOUT};
use crate::runner::CommandRunner;

/// Channel capacity for connection events.
const EVENT_CAPACITY: usize = 64;

/// A connection state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Address whose state changed.
    pub address: DeviceAddress,
    /// The new state.
    pub state: ConnectionState,
}

/// Thread-safe connection manager.
///
/// Operations on the same address are serialized by a per-address lock;
/// operations on different addresses run independently.
pub struct ConnectionManager<R> {
    /// Runner for transport invocations.
    runner: Arc<R>,
    /// Resolved transport executable.
    adb_path: PathBuf,
    /// Timeout for the TCP probe done by `connect`.
    probe_timeout: Duration,
    /// Timeout for transport invocations.
    command_timeout: Option<Duration>,
    /// Per-address state, each behind its own lock. Entries are kept for
    /// the manager's lifetime since `Disconnected` and `Unknown` differ.
    states: DashMap<DeviceAddress, Arc<Mutex<ConnectionState>>>,
    /// Event sender.
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl<R: CommandRunner> ConnectionManager<R> {
    /// Creates a connection manager using an already resolved transport path.
    pub fn new(runner: Arc<R>, adb_path: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runner,
            adb_path: adb_path.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            command_timeout: None,
            states: DashMap::new(),
            event_tx,
        }
    }

    /// Sets the timeout for the probe done by `connect`.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the timeout for transport invocations.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Returns the transport executable path.
    pub fn adb_path(&self) -> &PathBuf {
        &self.adb_path
    }

    /// Subscribes to connection state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the current state of `address`.
    ///
    /// Addresses never referenced before are `Unknown`. If an operation on the
    /// address is in flight, this waits for it to finish.
    pub async fn state(&self, address: &DeviceAddress) -> ConnectionState {
        match self.states.get(address).map(|entry| Arc::clone(entry.value())) {
            Some(slot) => *slot.lock().await,
            None => ConnectionState::Unknown,
        }
    }

    /// Checks whether a TCP connection to `address` can be opened within `timeout`.
    pub async fn probe_reachable(&self, address: &DeviceAddress, timeout: Duration) -> bool {
        probe_reachable(address, timeout).await
    }

    /// Connects the transport to `address`.
    ///
    /// The transport is only invoked when the TCP probe succeeds. The result is
    /// `Connected` only if the connect subcommand exits zero and its output
    /// reports success.
    pub async fn connect(&self, address: &DeviceAddress) -> ConnectionState {
        let slot = self.slot(address);
        let mut state = slot.lock().await;

        self.transition(address, &mut *state, ConnectionState::Probing);
        if !probe_reachable(address, self.probe_timeout).await {
            tracing::warn!(%address, "Device not reachable, transport not invoked");
            self.transition(address, &mut *state, ConnectionState::Unreachable);
            return *state;
        }

        self.transition(address, &mut *state, ConnectionState::Connecting);
        let args = transport::connect_args(address);
        let next = match self
            .runner
            .run(&self.adb_path, &args, self.command_timeout)
            .await
        {
            Ok(result) => {
                let output = result.combined_output();
                tracing::debug!(
                    %address,
                    exit_code = result.exit_code,
                    output = %output.trim(),
                    "Connect output"
                );
                if result.success() && transport::is_connect_success(&output) {
                    ConnectionState::Connected
                } else {
                    ConnectionState::ConnectFailed
                }
            }
            Err(e) => {
                tracing::error!(%address, error = %e, "Failed to run connect");
                ConnectionState::ConnectFailed
            }
        };

        self.transition(address, &mut *state, next);
        *state
    }

    /// Disconnects the transport from `address`.
    ///
    /// Success is a zero exit code; the output text is not inspected.
    pub async fn disconnect(&self, address: &DeviceAddress) -> bool {
        let slot = self.slot(address);
        let mut state = slot.lock().await;

        let args = transport::disconnect_args(address);
        match self
            .runner
            .run(&self.adb_path, &args, self.command_timeout)
            .await
        {
            Ok(result) if result.success() => {
                self.transition(address, &mut *state, ConnectionState::Disconnected);
                true
            }
            Ok(result) => {
                tracing::warn!(
                    %address,
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Disconnect failed"
                );
                false
            }
            Err(e) => {
                tracing::error!(%address, error = %e, "Failed to run disconnect");
                false
            }
        }
    }

    /// Lists the identifiers of devices the transport reports as online.
    ///
    /// Returns an empty list if the transport fails.
    pub async fn list_connected(&self) -> Vec<DeviceId> {
        let args = transport::devices_args();
        match self
            .runner
            .run(&self.adb_path, &args, self.command_timeout)
            .await
        {
            Ok(result) if result.success() => {
                let devices = transport::parse_devices(&result.stdout);
                tracing::debug!(count = devices.len(), "Listed devices");
                devices
            }
            Ok(result) => {
                tracing::warn!(
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Device listing failed"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to run device listing");
                Vec::new()
            }
        }
    }

    /// Checks whether commands can be elevated to the superuser on `device_id`.
    pub async fn has_root_access(&self, device_id: &DeviceId) -> bool {
        let args = transport::root_check_args(device_id);
        match self
            .runner
            .run(&self.adb_path, &args, self.command_timeout)
            .await
        {
            Ok(result) => {
                let rooted = result.success() && transport::has_superuser_marker(&result.stdout);
                tracing::debug!(device_id = %device_id, rooted, "Root check");
                rooted
            }
            Err(e) => {
                tracing::error!(device_id = %device_id, error = %e, "Failed to run root check");
                false
            }
        }
    }

    /// Returns the lock guarding `address`, creating it in `Unknown` state.
    fn slot(&self, address: &DeviceAddress) -> Arc<Mutex<ConnectionState>> {
        let entry = self
            .states
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionState::Unknown)));
        Arc::clone(entry.value())
    }

    fn transition(
        &self,
        address: &DeviceAddress,
        state: &mut ConnectionState,
        next: ConnectionState,
    ) {
        if *state == next {
            return;
        }
        tracing::info!(%address, from = %state, to = %next, "Connection state changed");
        *state = next;
        // No receivers is fine.
        let _ = self.event_tx.send(ConnectionEvent {
            address: address.clone(),
            state: next,
        });
    }
}
