//! Device-control command plumbing.
//!
//! The engine never talks to a device directly. It asks a [`DeviceBridge`]
//! for a ready-to-run [`Command`] and either runs it to completion under a
//! timeout ([`execute`]) or hands it to the process supervisor for an
//! unbounded pull.

pub mod size;

use crate::utils::errors::{Result, TransferError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Builds commands addressed to a single connected device.
pub trait DeviceBridge: Send + Sync {
    /// Command that runs `args` against `device_id`. Stdio is configured by
    /// the caller.
    fn command(&self, device_id: &str, args: &[OsString]) -> Command;
}

/// Bridge backed by the `adb` executable (`adb -s <serial> <args...>`).
#[derive(Debug, Clone)]
pub struct AdbBridge {
    executable: PathBuf,
}

impl AdbBridge {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl DeviceBridge for AdbBridge {
    fn command(&self, device_id: &str, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-s").arg(device_id).args(args);
        cmd
    }
}

/// Run a metadata command to completion and return its trimmed stdout.
///
/// A nonzero exit yields [`TransferError::CommandFailed`] carrying stderr, or
/// the exit status when stderr is empty. The child is killed if `timeout`
/// elapses first.
pub async fn execute(
    bridge: &dyn DeviceBridge,
    device_id: &str,
    args: &[OsString],
    timeout: Duration,
) -> Result<String> {
    let mut cmd = bridge.command(device_id, args);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(device = device_id, ?args, "Executing device command");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| TransferError::Spawn(e.to_string()))?,
        Err(_) => return Err(TransferError::Timeout(timeout)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(TransferError::CommandFailed(message));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Arguments for pulling `source` from the device into `destination`,
/// preserving timestamps and modes.
pub fn pull_args(source: &str, destination: &Path) -> Vec<OsString> {
    vec![
        OsString::from("pull"),
        OsString::from("-a"),
        OsString::from(source),
        destination.as_os_str().to_os_string(),
    ]
}

/// Arguments for pushing `source` from the host to `destination` on the device.
pub fn push_args(source: &Path, destination: &str) -> Vec<OsString> {
    vec![
        OsString::from("push"),
        source.as_os_str().to_os_string(),
        OsString::from(destination),
    ]
}

/// Quote a value for the device's POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Final component of a device path, ignoring trailing separators.
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Lossy display form of a command argument list, for log lines.
pub fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
