//! Session orchestrator for mirroring sessions.
//!
//! This module keeps at most one active [`Session`] per device and owns the
//! supervisor tasks that retire sessions when their process exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::{DeviceId, SessionOptions, SessionState};
use tokio::sync::{broadcast, Mutex};

use super::process::{Launch, Session, SessionId};
use crate::error::{ControlError, Result};

/// Channel capacity for session events.
const EVENT_CAPACITY: usize = 64;

/// Default time between SIGTERM and a forced kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(3000);

/// Default number of output lines buffered per subscriber.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 1024;

/// Extra time `stop` allows beyond the grace period for the kill and the
/// output readers to finish.
const STOP_MARGIN: Duration = Duration::from_secs(5);

/// A session state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Device the session belongs to.
    pub device_id: DeviceId,
    /// Session whose state changed.
    pub session_id: SessionId,
    /// The new state.
    pub state: SessionState,
}

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// Thread-safe session orchestrator.
///
/// `start` and `stop` for the same device are serialized by a per-device
/// lock; different devices are independent.
pub struct SessionOrchestrator {
    /// How the server process is launched.
    launch: Launch,
    /// Current session per device. Empty slots nobody holds are pruned.
    sessions: Arc<DashMap<DeviceId, Slot>>,
    /// Time `stop` waits beyond the grace period.
    stop_margin: Duration,
    /// Event sender.
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionOrchestrator {
    /// Creates an orchestrator launching `server_path`.
    ///
    /// `adb_path` is exported to the server as `ADB` so that it talks to the
    /// same transport as the rest of the control plane.
    pub fn new(server_path: impl Into<PathBuf>, adb_path: impl Into<PathBuf>) -> Self {
        let adb_path: PathBuf = adb_path.into();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            launch: Launch {
                program: server_path.into(),
                leading_args: Vec::new(),
                env: vec![("ADB".to_string(), adb_path.to_string_lossy().into_owned())],
                stop_grace: DEFAULT_STOP_GRACE,
                output_capacity: DEFAULT_OUTPUT_CAPACITY,
            },
            sessions: Arc::new(DashMap::new()),
            stop_margin: STOP_MARGIN,
            event_tx,
        }
    }

    /// Sets arguments placed before the device selector.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.launch.leading_args = args;
        self
    }

    /// Sets the time between SIGTERM and a forced kill.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.launch.stop_grace = grace;
        self
    }

    /// Sets the number of output lines buffered per subscriber.
    pub fn with_output_capacity(mut self, lines: usize) -> Self {
        self.launch.output_capacity = lines;
        self
    }

    /// Returns the server executable path.
    pub fn server_path(&self) -> &PathBuf {
        &self.launch.program
    }

    /// Subscribes to session state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Starts a mirroring session for `device_id`.
    ///
    /// Returns as soon as the process is spawned; the session is `Running`
    /// at that point. Its output is drained in the background.
    ///
    /// # Errors
    /// * [`ControlError::InvalidOptions`] if `options` are rejected.
    /// * [`ControlError::SessionConflict`] if a session is already active for the device.
    /// * [`ControlError::Execution`] if the server cannot be spawned.
    pub async fn start(&self, device_id: &DeviceId, options: SessionOptions) -> Result<Arc<Session>> {
        options.validate()?;

        let slot = self.slot(device_id);
        let mut current = slot.lock().await;

        if let Some(existing) = current.as_ref() {
            if existing.is_active() {
                tracing::warn!(
                    device_id = %device_id,
                    session_id = %existing.id(),
                    "Session already running"
                );
                return Err(ControlError::SessionConflict(device_id.clone()));
            }
        }

        let (session, supervisor) = Session::spawn(device_id.clone(), options, &self.launch)?;
        let session_id = supervisor.session_id();

        emit(&self.event_tx, device_id, session_id, SessionState::Starting);
        emit(&self.event_tx, device_id, session_id, SessionState::Running);

        *current = Some(Arc::clone(&session));
        drop(current);

        let sessions = Arc::clone(&self.sessions);
        let event_tx = self.event_tx.clone();
        let device_id = device_id.clone();
        tokio::spawn(async move {
            let terminal = supervisor.run().await;
            retire(&sessions, &device_id, session_id).await;
            emit(&event_tx, &device_id, session_id, terminal);
        });

        Ok(session)
    }

    /// Stops the session for `device_id`, if any.
    ///
    /// Returns once the process has exited and the registry entry has been
    /// cleared. Stopping a device with no active session is a no-op.
    ///
    /// # Errors
    /// [`ControlError::Timeout`] if the exit is not observed within the grace
    /// period plus a margin. The session then stays registered.
    pub async fn stop(&self, device_id: &DeviceId) -> Result<()> {
        let Some(slot) = self
            .sessions
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            tracing::debug!(device_id = %device_id, "No session to stop");
            return Ok(());
        };

        let mut current = slot.lock().await;
        let Some(session) = current.clone() else {
            tracing::debug!(device_id = %device_id, "No session to stop");
            return Ok(());
        };

        if session.is_active() {
            session.request_stop();
            emit(&self.event_tx, device_id, session.id(), SessionState::Stopping);

            let bound = self.launch.stop_grace + self.stop_margin;
            let Ok(state) = tokio::time::timeout(bound, session.wait()).await else {
                tracing::warn!(
                    device_id = %device_id,
                    session_id = %session.id(),
                    ?bound,
                    "Session did not report exit in time"
                );
                return Err(ControlError::Timeout {
                    program: self.launch.program.clone(),
                    after: bound,
                });
            };
            tracing::info!(
                device_id = %device_id,
                session_id = %session.id(),
                state = %state,
                "Session stopped"
            );
        }

        *current = None;
        drop(current);
        drop(slot);
        prune(&self.sessions, device_id);

        Ok(())
    }

    /// Stops every active session.
    pub async fn stop_all(&self) {
        let devices: Vec<DeviceId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let stops = devices.iter().map(|device_id| self.stop(device_id));
        for result in futures_util::future::join_all(stops).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to stop session");
            }
        }
    }

    /// Returns the state of the session for `device_id`.
    ///
    /// Devices without a session are `Idle`.
    pub async fn state(&self, device_id: &DeviceId) -> SessionState {
        self.get(device_id)
            .await
            .map(|session| session.state())
            .unwrap_or_default()
    }

    /// Returns the current session for `device_id`.
    pub async fn get(&self, device_id: &DeviceId) -> Option<Arc<Session>> {
        let slot = self
            .sessions
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))?;
        let current = slot.lock().await;
        current.clone()
    }

    /// Lists all current sessions.
    pub async fn list(&self) -> Vec<Arc<Session>> {
        let slots: Vec<Slot> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut sessions = Vec::new();
        for slot in slots {
            if let Some(session) = slot.lock().await.clone() {
                sessions.push(session);
            }
        }
        sessions
    }

    /// Returns the number of current sessions.
    pub async fn count(&self) -> usize {
        self.list().await.len()
    }

    /// Returns the lock guarding `device_id`, creating an empty one.
    fn slot(&self, device_id: &DeviceId) -> Slot {
        let entry = self
            .sessions
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)));
        Arc::clone(entry.value())
    }
}

/// Clears the registry entry for `device_id` if it still holds `session_id`.
async fn retire(sessions: &DashMap<DeviceId, Slot>, device_id: &DeviceId, session_id: SessionId) {
    let Some(slot) = sessions.get(device_id).map(|entry| Arc::clone(entry.value())) else {
        return;
    };
    {
        let mut current = slot.lock().await;
        if current.as_ref().is_some_and(|s| s.id() == session_id) {
            *current = None;
            tracing::debug!(device_id = %device_id, session_id = %session_id, "Retired session");
        }
    }
    drop(slot);
    prune(sessions, device_id);
}

/// Removes the slot for `device_id` if it is empty and no task holds it.
///
/// The map's shard lock is held while checking, so no new holder can
/// appear in between.
fn prune(sessions: &DashMap<DeviceId, Slot>, device_id: &DeviceId) {
    let removed = sessions.remove_if(device_id, |_, slot| {
        Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|current| current.is_none())
    });
    if removed.is_some() {
        tracing::trace!(device_id = %device_id, "Pruned empty session slot");
    }
}

fn emit(
    event_tx: &broadcast::Sender<SessionEvent>,
    device_id: &DeviceId,
    session_id: SessionId,
    state: SessionState,
) {
    // No receivers is fine.
    let _ = event_tx.send(SessionEvent {
        device_id: device_id.clone(),
        session_id,
        state,
    });
}
