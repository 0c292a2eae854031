//! Mirroring session processes.
//!
//! A [`Session`] is the handle callers keep for one launched server process.
//! The process itself is owned by a [`Supervisor`] task that drains its
//! output, waits for it to exit, and handles stop requests.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::Stream;
use protocol::{DeviceId, SessionOptions, SessionState};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ControlError, Result};

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Time allowed for the output readers to reach end of stream after exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the server process is launched.
#[derive(Debug, Clone)]
pub struct Launch {
    /// Server executable.
    pub program: PathBuf,
    /// Arguments placed before the device selector.
    pub leading_args: Vec<String>,
    /// Extra environment for the server.
    pub env: Vec<(String, String)>,
    /// Time between SIGTERM and a forced kill.
    pub stop_grace: Duration,
    /// Lines buffered per output subscriber.
    pub output_capacity: usize,
}

type OutputSlot = Arc<Mutex<Option<broadcast::Sender<String>>>>;

/// A launched mirroring session.
pub struct Session {
    id: SessionId,
    device_id: DeviceId,
    options: SessionOptions,
    pid: Option<u32>,
    state: watch::Receiver<SessionState>,
    output: OutputSlot,
    first_output: Mutex<Option<broadcast::Receiver<String>>>,
    stop: CancellationToken,
}

impl Session {
    /// Spawns the server process for `device_id`.
    ///
    /// Returns the session handle and the supervisor that must be driven to
    /// completion for the session to make progress.
    pub(crate) fn spawn(
        device_id: DeviceId,
        options: SessionOptions,
        launch: &Launch,
    ) -> Result<(Arc<Self>, Supervisor)> {
        let mut args = launch.leading_args.clone();
        args.extend(options.to_args(&device_id));

        let mut child = Command::new(&launch.program)
            .args(&args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ControlError::Execution {
                program: launch.program.clone(),
                source,
            })?;

        let id = Uuid::new_v4();
        let pid = child.id();

        // At least one slot so a zero capacity never panics. The first
        // receiver exists before any reader runs so it sees every line.
        let (output_tx, first_rx) = broadcast::channel(launch.output_capacity.max(1));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(
                stdout,
                "stdout",
                device_id.clone(),
                output_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(
                stderr,
                "stderr",
                device_id.clone(),
                output_tx.clone(),
            )));
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Running);
        let output = Arc::new(Mutex::new(Some(output_tx)));
        let stop = CancellationToken::new();

        tracing::info!(
            session_id = %id,
            device_id = %device_id,
            pid = ?pid,
            program = %launch.program.display(),
            ?args,
            "Spawned session process"
        );

        let session = Arc::new(Self {
            id,
            device_id: device_id.clone(),
            options,
            pid,
            state: state_rx,
            output: Arc::clone(&output),
            first_output: Mutex::new(Some(first_rx)),
            stop: stop.clone(),
        });

        let supervisor = Supervisor {
            session_id: id,
            device_id,
            child,
            pid,
            stop,
            stop_grace: launch.stop_grace,
            state_tx,
            drains,
            output,
        };

        Ok((session, supervisor))
    }

    /// Returns the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the device this session mirrors.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Returns the options the session was started with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the process ID of the server, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns true until the process has exited.
    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the process has exited and returns the terminal state.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.state.clone();
        if let Ok(state) = rx.wait_for(SessionState::is_terminal).await {
            return (*state).clone();
        }
        // The supervisor always publishes before dropping the sender.
        let state = rx.borrow().clone();
        state
    }

    /// Takes the output from its first line.
    ///
    /// Only the first call returns `Some`. Lines stay buffered for it up to
    /// the output capacity, even after the process has exited.
    pub fn take_output(&self) -> Option<SessionOutput> {
        let rx = self
            .first_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(SessionOutput {
            device_id: self.device_id.clone(),
            rx,
        })
    }

    /// Returns the full output if it has not been taken yet, otherwise
    /// subscribes to lines produced from now on.
    pub fn output(&self) -> SessionOutput {
        self.take_output().unwrap_or_else(|| self.subscribe())
    }

    /// Subscribes to output lines produced from now on.
    ///
    /// Subscribing after the output has finished yields an already
    /// finished sequence.
    pub fn subscribe(&self) -> SessionOutput {
        let guard = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = match guard.as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        };
        SessionOutput {
            device_id: self.device_id.clone(),
            rx,
        }
    }

    /// Asks the supervisor to stop the process.
    pub(crate) fn request_stop(&self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("pid", &self.pid)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// A subscriber's view of a session's output lines.
///
/// Lines from stdout and stderr are interleaved in arrival order. A
/// subscriber that falls more than the buffer capacity behind skips the
/// lines it missed.
pub struct SessionOutput {
    device_id: DeviceId,
    rx: broadcast::Receiver<String>,
}

impl SessionOutput {
    /// Returns the next line, or `None` once the process has exited and all
    /// of its output has been delivered.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        device_id = %self.device_id,
                        skipped,
                        "Output subscriber lagged, lines dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Converts into a stream of lines.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        futures_util::stream::unfold(self, |mut output| async move {
            output.next_line().await.map(|line| (line, output))
        })
    }
}

/// Owns a session's process until it exits.
pub(crate) struct Supervisor {
    session_id: SessionId,
    device_id: DeviceId,
    child: Child,
    pid: Option<u32>,
    stop: CancellationToken,
    stop_grace: Duration,
    state_tx: watch::Sender<SessionState>,
    drains: Vec<JoinHandle<()>>,
    output: OutputSlot,
}

impl Supervisor {
    /// Returns the ID of the supervised session.
    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Runs until the process exits, publishes the terminal state, and
    /// returns it.
    pub(crate) async fn run(mut self) -> SessionState {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            () = self.stop.cancelled() => None,
        };

        let (status, stop_requested) = match exited {
            Some(status) => (status, false),
            None => (self.terminate().await, true),
        };

        let terminal = match status {
            Ok(status) => classify(status, stop_requested),
            Err(e) => {
                tracing::error!(
                    session_id = %self.session_id,
                    device_id = %self.device_id,
                    error = %e,
                    "Failed to wait for session process"
                );
                SessionState::Failed { exit_code: None }
            }
        };

        self.finish_output().await;

        tracing::info!(
            session_id = %self.session_id,
            device_id = %self.device_id,
            state = %terminal,
            "Session ended"
        );
        self.state_tx.send_replace(terminal.clone());
        terminal
    }

    /// Sends SIGTERM, then kills the process if it outlives the grace period.
    async fn terminate(&mut self) -> std::io::Result<ExitStatus> {
        tracing::info!(
            session_id = %self.session_id,
            device_id = %self.device_id,
            "Stopping session"
        );
        self.state_tx.send_replace(SessionState::Stopping);
        self.signal_terminate();

        match tokio::time::timeout(self.stop_grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    device_id = %self.device_id,
                    grace = ?self.stop_grace,
                    "Session did not exit after SIGTERM, killing"
                );
                self.child.kill().await?;
                self.child.wait().await
            }
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            // Already reaped.
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            tracing::warn!(session_id = %self.session_id, pid, error = %e, "Failed to send SIGTERM");
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to kill session process");
        }
    }

    /// Waits for the readers to finish, then closes the output channel.
    async fn finish_output(&mut self) {
        for mut handle in self.drains.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!(
                    session_id = %self.session_id,
                    "Output still open after exit, abandoning reader"
                );
                handle.abort();
            }
        }
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Maps an exit status to a terminal state.
fn classify(status: ExitStatus, stop_requested: bool) -> SessionState {
    let exit_code = status.code();
    if stop_requested || exit_code == Some(0) {
        SessionState::Stopped { exit_code }
    } else {
        SessionState::Failed { exit_code }
    }
}

/// Forwards lines from one of the process's output streams.
async fn drain<R>(reader: R, stream: &'static str, device_id: DeviceId, tx: broadcast::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                tracing::debug!(device_id = %device_id, stream, %line, "Session output");
                // No subscribers is fine.
                let _ = tx.send(line);
            }
            Err(e) => {
                tracing::warn!(device_id = %device_id, stream, error = %e, "Failed to read session output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn launch(script: &str) -> Launch {
        Launch {
            program: PathBuf::from("/bin/sh"),
            leading_args: vec![
                "-c".to_string(),
                script.to_string(),
                "mirror-server".to_string(),
            ],
            env: vec![("ADB".to_string(), "/opt/tools/adb".to_string())],
            stop_grace: Duration::from_secs(2),
            output_capacity: 64,
        }
    }

    fn device() -> DeviceId {
        DeviceId::new("192.168.1.100:5555")
    }

    #[tokio::test]
    async fn test_spawn_passes_device_selector_and_options() {
        let options = SessionOptions {
            bit_rate_mbps: Some(16),
            stay_awake: true,
            ..Default::default()
        };
        let (session, supervisor) =
            Session::spawn(device(), options, &launch("echo \"args: $*\"")).unwrap();
        let mut output = session.output();
        tokio::spawn(supervisor.run());

        let line = output.next_line().await.unwrap();
        assert_eq!(line, "args: -s 192.168.1.100:5555 -b 16M --stay-awake");
    }

    #[tokio::test]
    async fn test_spawn_exports_environment() {
        let (session, supervisor) = Session::spawn(
            device(),
            SessionOptions::default(),
            &launch("echo \"adb=$ADB\""),
        )
        .unwrap();
        let mut output = session.output();
        tokio::spawn(supervisor.run());

        assert_eq!(output.next_line().await.unwrap(), "adb=/opt/tools/adb");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_is_execution_error() {
        let mut launch = launch("true");
        launch.program = PathBuf::from("/nonexistent/mirror-server");

        let result = Session::spawn(device(), SessionOptions::default(), &launch);
        assert!(matches!(result, Err(ControlError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_natural_exit_zero_is_stopped() {
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch("exit 0")).unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let terminal = supervisor.run().await;

        assert_eq!(terminal, SessionState::Stopped { exit_code: Some(0) });
        assert_eq!(session.wait().await, terminal);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_natural_exit_nonzero_is_failed() {
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch("exit 3")).unwrap();
        tokio::spawn(supervisor.run());

        assert_eq!(
            session.wait().await,
            SessionState::Failed { exit_code: Some(3) }
        );
    }

    #[tokio::test]
    async fn test_stop_terminates_with_sigterm() {
        let (session, supervisor) = Session::spawn(
            device(),
            SessionOptions::default(),
            &launch("exec sleep 30"),
        )
        .unwrap();
        let task = tokio::spawn(supervisor.run());

        session.request_stop();
        let terminal = task.await.unwrap();

        // Killed by a signal, so no exit code.
        assert_eq!(terminal, SessionState::Stopped { exit_code: None });
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill_after_grace() {
        let mut launch = launch("trap '' TERM; echo ready; while true; do sleep 1; done");
        launch.stop_grace = Duration::from_millis(200);
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch).unwrap();
        let mut output = session.output();
        let task = tokio::spawn(supervisor.run());

        assert_eq!(output.next_line().await.unwrap(), "ready");
        session.request_stop();

        let terminal = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(terminal, SessionState::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_output_interleaves_stderr_and_finishes() {
        let (session, supervisor) = Session::spawn(
            device(),
            SessionOptions::default(),
            &launch("echo out; sleep 0.1; echo err >&2"),
        )
        .unwrap();
        let output = session.output();
        tokio::spawn(supervisor.run());

        let lines: Vec<String> = output.into_stream().collect().await;
        assert_eq!(lines, vec!["out".to_string(), "err".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_after_exit_is_finished() {
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch("echo gone")).unwrap();
        supervisor.run().await;

        let mut output = session.subscribe();
        assert_eq!(output.next_line().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_taken_output_keeps_lines_printed_before_exit() {
        let (session, supervisor) = Session::spawn(
            device(),
            SessionOptions::default(),
            &launch("echo 'ERROR: device unauthorized' >&2; exit 1"),
        )
        .unwrap();
        tokio::spawn(supervisor.run());

        assert_eq!(
            session.wait().await,
            SessionState::Failed { exit_code: Some(1) }
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut output = session.take_output().unwrap();
        assert_eq!(
            output.next_line().await.as_deref(),
            Some("ERROR: device unauthorized")
        );
        assert_eq!(output.next_line().await, None);
    }

    #[tokio::test]
    async fn test_output_is_taken_once() {
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch("echo once")).unwrap();
        supervisor.run().await;

        let mut first = session.output();
        assert_eq!(first.next_line().await.as_deref(), Some("once"));
        assert!(session.take_output().is_none());

        let mut later = session.output();
        assert_eq!(later.next_line().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_lines() {
        let mut launch = launch("for i in 1 2 3 4 5 6 7 8; do echo line$i; done");
        launch.output_capacity = 2;
        let (session, supervisor) =
            Session::spawn(device(), SessionOptions::default(), &launch).unwrap();
        let mut output = session.subscribe();
        supervisor.run().await;

        let mut lines = Vec::new();
        while let Some(line) = output.next_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["line7".to_string(), "line8".to_string()]);
    }

    #[tokio::test]
    async fn test_each_session_has_unique_id() {
        let (a, sa) = Session::spawn(device(), SessionOptions::default(), &launch("true")).unwrap();
        let (b, sb) = Session::spawn(device(), SessionOptions::default(), &launch("true")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(sa.session_id(), a.id());
        sa.run().await;
        sb.run().await;
    }

    #[test]
    fn test_classify() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let code_2 = ExitStatus::from_raw(2 << 8);
        let sigterm = ExitStatus::from_raw(15);

        assert_eq!(classify(ok, false), SessionState::Stopped { exit_code: Some(0) });
        assert_eq!(classify(code_2, false), SessionState::Failed { exit_code: Some(2) });
        assert_eq!(classify(code_2, true), SessionState::Stopped { exit_code: Some(2) });
        assert_eq!(classify(sigterm, false), SessionState::Failed { exit_code: None });
        assert_eq!(classify(sigterm, true), SessionState::Stopped { exit_code: None });
    }
}
