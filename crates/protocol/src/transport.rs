//! Argument vectors for, and output parsing of, the transport binary.
//!
//! The transport is a third-party tool. Only the subcommands and the output
//! shapes used by the control plane are modeled here:
//!
//! | Operation  | Arguments                          |
//! |------------|------------------------------------|
//! | connect    | `connect <host:port>`              |
//! | disconnect | `disconnect <host:port>`           |
//! | devices    | `devices`                          |
//! | shell      | `-s <id> shell <cmd>`              |
//! | root shell | `-s <id> shell su -c '<cmd>'`      |

use crate::device::{DeviceAddress, DeviceId};

/// Header line printed by `devices` before the device table.
pub const DEVICES_HEADER: &str = "List of devices attached";

/// State column value of a device that is online and usable.
pub const DEVICE_STATE_ONLINE: &str = "device";

/// Line prefixes the transport prints when `connect` succeeded.
pub const CONNECT_SUCCESS_PREFIXES: &[&str] = &["connected to ", "already connected to "];

/// Substring the identity check prints when running as the superuser.
pub const SUPERUSER_MARKER: &str = "uid=0";

/// Command run through the elevation wrapper to check for root access.
pub const IDENTITY_COMMAND: &str = "id";

/// Arguments for `connect <host:port>`.
pub fn connect_args(address: &DeviceAddress) -> Vec<String> {
    vec!["connect".to_string(), address.to_string()]
}

/// Arguments for `disconnect <host:port>`.
pub fn disconnect_args(address: &DeviceAddress) -> Vec<String> {
    vec!["disconnect".to_string(), address.to_string()]
}

/// Arguments for `devices`.
pub fn devices_args() -> Vec<String> {
    vec!["devices".to_string()]
}

/// Arguments for running `command_line` in the device shell.
///
/// The command line is passed through verbatim as one argument; the remote
/// shell does the word splitting. When `use_root` is set the command is
/// wrapped once in `su -c '...'`. No quoting is applied, so a command line
/// containing a single quote must be quoted by the caller.
pub fn shell_args(device_id: &DeviceId, command_line: &str, use_root: bool) -> Vec<String> {
    let remote = if use_root {
        elevate(command_line)
    } else {
        command_line.to_string()
    };
    vec![
        "-s".to_string(),
        device_id.to_string(),
        "shell".to_string(),
        remote,
    ]
}

/// Arguments for the elevated identity check.
pub fn root_check_args(device_id: &DeviceId) -> Vec<String> {
    shell_args(device_id, IDENTITY_COMMAND, true)
}

/// Wraps a command line in the elevation invocation.
pub fn elevate(command_line: &str) -> String {
    format!("su -c '{command_line}'")
}

/// Returns true if `connect` output reports an established connection.
///
/// Matching is done per line on the known success prefixes rather than on a
/// bare `connected` substring, which would also match `disconnected` or
/// `failed to authenticate; not connected`.
pub fn is_connect_success(output: &str) -> bool {
    output.lines().any(|line| {
        let line = line.trim_start().to_ascii_lowercase();
        CONNECT_SUCCESS_PREFIXES
            .iter()
            .any(|prefix| line.starts_with(prefix))
    })
}

/// Returns true if identity check output shows the superuser.
pub fn has_superuser_marker(output: &str) -> bool {
    output.contains(SUPERUSER_MARKER)
}

/// Parses the `devices` table into the identifiers of online devices.
///
/// The header line and any line whose state column is not `device`
/// (`offline`, `unauthorized`, daemon start-up chatter) are skipped.
pub fn parse_devices(output: &str) -> Vec<DeviceId> {
    output
        .lines()
        .filter(|line| !line.starts_with(DEVICES_HEADER))
        .filter_map(|line| {
            let mut columns = line.split('\t');
            let id = columns.next()?.trim();
            let state = columns.next()?.split_whitespace().next()?;
            (!id.is_empty() && state == DEVICE_STATE_ONLINE).then(|| DeviceId::new(id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("192.168.1.100:5555")
    }

    #[test]
    fn test_connect_and_disconnect_args() {
        let addr = DeviceAddress::new("192.168.1.100", 5555);
        assert_eq!(connect_args(&addr), vec!["connect", "192.168.1.100:5555"]);
        assert_eq!(
            disconnect_args(&addr),
            vec!["disconnect", "192.168.1.100:5555"]
        );
        assert_eq!(devices_args(), vec!["devices"]);
    }

    #[test]
    fn test_shell_args_plain() {
        let args = shell_args(&device(), "ls -la /sdcard", false);
        assert_eq!(
            args,
            vec!["-s", "192.168.1.100:5555", "shell", "ls -la /sdcard"]
        );
    }

    #[test]
    fn test_shell_args_root_wraps_once() {
        let first = shell_args(&device(), "id", true);
        let second = shell_args(&device(), "id", true);
        assert_eq!(first, second);
        assert_eq!(first[3], "su -c 'id'");
        assert_eq!(first[3].matches("su -c").count(), 1);
    }

    #[test]
    fn test_root_check_args() {
        assert_eq!(
            root_check_args(&device()),
            vec!["-s", "192.168.1.100:5555", "shell", "su -c 'id'"]
        );
    }

    #[test]
    fn test_connect_success_markers() {
        assert!(is_connect_success("connected to 192.168.1.100:5555\n"));
        assert!(is_connect_success(
            "already connected to 192.168.1.100:5555\n"
        ));
        assert!(is_connect_success(
            "* daemon started successfully\nconnected to 10.0.0.2:5555\n"
        ));
    }

    #[test]
    fn test_connect_failure_outputs() {
        assert!(!is_connect_success("unable to connect"));
        assert!(!is_connect_success(
            "failed to connect to '192.168.1.100:5555': Connection refused\n"
        ));
        assert!(!is_connect_success(
            "failed to authenticate to 192.168.1.100:5555\n"
        ));
        assert!(!is_connect_success("disconnected 192.168.1.100:5555\n"));
        assert!(!is_connect_success(""));
    }

    #[test]
    fn test_superuser_marker() {
        assert!(has_superuser_marker(
            "uid=0(root) gid=0(root) groups=0(root) context=u:r:su:s0\n"
        ));
        assert!(!has_superuser_marker("uid=2000(shell) gid=2000(shell)\n"));
        assert!(!has_superuser_marker("/system/bin/sh: su: not found\n"));
    }

    #[test]
    fn test_parse_devices_single() {
        let output = "List of devices attached\n192.168.1.100:5555\tdevice\n";
        assert_eq!(parse_devices(output), vec![device()]);
    }

    #[test]
    fn test_parse_devices_header_only() {
        assert!(parse_devices("List of devices attached\n").is_empty());
        assert!(parse_devices("List of devices attached\n\n").is_empty());
        assert!(parse_devices("").is_empty());
    }

    #[test]
    fn test_parse_devices_skips_non_online() {
        let output = "List of devices attached\n\
                      192.168.1.100:5555\tdevice\n\
                      192.168.1.101:5555\toffline\n\
                      emulator-5554\tunauthorized\n\
                      R58M123ABC\tdevice\n";
        assert_eq!(
            parse_devices(output),
            vec![device(), DeviceId::new("R58M123ABC")]
        );
    }

    #[test]
    fn test_parse_devices_ignores_daemon_chatter() {
        let output = "* daemon not running; starting now at tcp:5037\n\
                      * daemon started successfully\n\
                      List of devices attached\n\
                      192.168.1.100:5555\tdevice\n";
        assert_eq!(parse_devices(output), vec![device()]);
    }

    #[test]
    fn test_parse_devices_handles_crlf() {
        let output = "List of devices attached\r\n192.168.1.100:5555\tdevice\r\n";
        assert_eq!(parse_devices(output), vec![device()]);
    }

    #[test]
    fn test_parse_devices_with_trailing_properties() {
        let output = "List of devices attached\n\
                      192.168.1.100:5555\tdevice product:x model:y\n";
        assert_eq!(parse_devices(output), vec![device()]);
    }
}
