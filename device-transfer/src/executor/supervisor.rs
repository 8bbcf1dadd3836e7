//! Supervision of the external pull/push process.
//!
//! A [`TransferProcess`] owns one child process, collects its combined
//! stdout/stderr for error reporting and offers a single [`cancel`] that
//! signals the child and releases the handle.
//!
//! [`cancel`]: TransferProcess::cancel

use crate::utils::errors::{Result, TransferError};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output kept for post-mortem messages; older output is dropped first.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How long to wait for output readers after the child has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct TransferProcess {
    label: String,
    child: Option<Child>,
    output: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl TransferProcess {
    /// Spawn `command` with piped output. `label` names the process in logs.
    pub fn spawn(mut command: Command, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| TransferError::Spawn(e.to_string()))?;

        info!(process = %label, pid = child.id(), "Transfer process started");

        let output = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(collect_output(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(collect_output(stderr, Arc::clone(&output))));
        }

        Ok(Self {
            label,
            child: Some(child),
            output,
            readers,
        })
    }

    /// Wait for the child to exit. Safe to drop and call again.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => Ok(child.wait().await?),
            None => Err(TransferError::Spawn(format!(
                "{}: process handle already released",
                self.label
            ))),
        }
    }

    /// Whether a live handle is still held.
    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate the child and release the handle.
    ///
    /// Sends a termination signal, waits up to `grace` for the child to exit
    /// and kills it outright after that. Calling it again is a no-op.
    pub async fn cancel(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else { return };

        info!(process = %self.label, "Terminating transfer process");
        terminate(&mut child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(process = %self.label, %status, "Transfer process exited after signal"),
            Ok(Err(e)) => warn!(process = %self.label, "Failed waiting for transfer process: {}", e),
            Err(_) => {
                warn!(process = %self.label, "Transfer process ignored termination signal, killing");
                if let Err(e) = child.kill().await {
                    warn!(process = %self.label, "Failed to kill transfer process: {}", e);
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    /// Release the handle after exit and return the combined output.
    pub async fn finish(mut self) -> String {
        self.child = None;
        for reader in std::mem::take(&mut self.readers) {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                debug!(process = %self.label, "Output reader still open after exit");
            }
        }
        self.output()
    }

    /// Output collected so far.
    pub fn output(&self) -> String {
        match self.output.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for TransferProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Human-readable failure message for a nonzero exit.
pub fn failure_message(status: ExitStatus, output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        match status.code() {
            Some(code) => format!("exited with code {}", code),
            None => format!("terminated ({})", status),
        }
    } else {
        output.to_string()
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, "Failed to send SIGTERM: {}", e);
            }
        }
        None => debug!("Transfer process already reaped"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill transfer process: {}", e);
    }
}

/// Drain `reader` to EOF, keeping the most recent output.
///
/// Lines are decoded lossily so bytes that are not UTF-8 never stop the
/// drain. Stopping early would close the pipe under a running child.
async fn collect_output<R>(reader: R, output: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut chunk = (&mut reader).take(MAX_OUTPUT_BYTES as u64);
        match chunk.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let mut buf = match output.lock() {
                    Ok(buf) => buf,
                    Err(poisoned) => poisoned.into_inner(),
                };
                buf.push_str(text.trim_end_matches(['\r', '\n']));
                buf.push('\n');
                keep_tail(&mut buf, MAX_OUTPUT_BYTES);
            }
            Err(e) => {
                debug!("Output reader stopped: {}", e);
                break;
            }
        }
    }
}

/// Drop the oldest output so that at most `max` bytes remain, cutting at a
/// line start when one is available.
fn keep_tail(buf: &mut String, max: usize) {
    if buf.len() <= max {
        return;
    }
    let mut cut = buf.len() - max;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    if let Some(newline) = buf[cut..].find('\n') {
        if cut + newline + 1 < buf.len() {
            cut += newline + 1;
        }
    }
    buf.drain(..cut);
}
