//! TCP reachability probing.

use std::time::Duration;

use protocol::DeviceAddress;
use tokio::net::TcpStream;

/// Default time allowed for a reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Attempts a raw TCP connection to `address`.
///
/// Returns true only if the connection is established within `timeout`.
/// The socket is closed before returning in every case.
pub async fn probe_reachable(address: &DeviceAddress, timeout: Duration) -> bool {
    let attempt = TcpStream::connect((address.host(), address.port()));

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(stream)) => {
            drop(stream);
            tracing::debug!(%address, "Device reachable");
            true
        }
        Ok(Err(e)) => {
            tracing::debug!(%address, error = %e, "Device not reachable");
            false
        }
        Err(_) => {
            tracing::debug!(%address, ?timeout, "Reachability probe timed out");
            false
        }
    }
}
