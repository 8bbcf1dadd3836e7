//! Remote size estimation.
//!
//! Asks the device shell for `du -sk <path>` before a pull starts so the
//! progress poller has something to compute a percentage against.

use super::{execute, shell_quote, DeviceBridge};
use std::ffi::OsString;
use std::time::Duration;
use tracing::{debug, warn};

/// Estimated byte size of `remote_path` on the device.
///
/// Returns 0 when the size is unknown: the command failed, timed out or
/// printed something without a leading integer. Callers treat 0 as
/// "report progress qualitatively".
pub async fn estimate_remote_size(
    bridge: &dyn DeviceBridge,
    device_id: &str,
    remote_path: &str,
    timeout: Duration,
) -> u64 {
    let args = [
        OsString::from("shell"),
        OsString::from("du"),
        OsString::from("-sk"),
        OsString::from(shell_quote(remote_path)),
    ];

    match execute(bridge, device_id, &args, timeout).await {
        Ok(output) => match parse_du_output(&output) {
            Some(bytes) => {
                debug!(path = remote_path, bytes, "Estimated remote size");
                bytes
            }
            None => {
                warn!(path = remote_path, output = %output, "Unparseable size output, size unknown");
                0
            }
        },
        Err(e) => {
            warn!(path = remote_path, "Remote size estimate failed: {}", e);
            0
        }
    }
}

/// Parse the leading kilobyte count of `du -sk` output into bytes.
pub fn parse_du_output(output: &str) -> Option<u64> {
    let token = output.split_whitespace().next()?;
    let kilobytes: u64 = token.parse().ok()?;
    kilobytes.checked_mul(1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_du_output() {
        assert_eq!(parse_du_output("2048\t/sdcard/DCIM"), Some(2048 * 1024));
        assert_eq!(parse_du_output("  12 /sdcard/Download\n"), Some(12 * 1024));
        assert_eq!(parse_du_output("0\t/sdcard/empty"), Some(0));
    }

    #[test]
    fn test_parse_du_output_rejects_garbage() {
        assert_eq!(parse_du_output(""), None);
        assert_eq!(parse_du_output("du: /sdcard/x: No such file or directory"), None);
        assert_eq!(parse_du_output("-5\t/sdcard"), None);
        assert_eq!(parse_du_output("99999999999999999999\t/sdcard"), None);
    }

    #[cfg(unix)]
    mod shell {
        use super::super::*;
        use tokio::process::Command;

        /// Runs the device-side command string in a local shell.
        struct LocalShell;

        impl DeviceBridge for LocalShell {
            fn command(&self, _device_id: &str, args: &[OsString]) -> Command {
                let line = args[1..]
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" ");
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
        }

        #[tokio::test]
        async fn test_estimate_missing_path_is_zero() {
            let size = estimate_remote_size(
                &LocalShell,
                "dev",
                "/definitely/not/here/at/all",
                Duration::from_secs(5),
            )
            .await;
            assert_eq!(size, 0);
        }

        #[tokio::test]
        async fn test_estimate_quotes_paths_with_spaces() -> std::io::Result<()> {
            let temp_dir = tempfile::TempDir::new()?;
            let dir = temp_dir.path().join("My Photos");
            std::fs::create_dir(&dir)?;
            std::fs::write(dir.join("a.bin"), vec![7u8; 8192])?;

            let size = estimate_remote_size(
                &LocalShell,
                "dev",
                dir.to_str().unwrap(),
                Duration::from_secs(5),
            )
            .await;
            assert!(size >= 8192, "size was {}", size);
            assert_eq!(size % 1024, 0);
            Ok(())
        }
    }
}
