//! Transfer orchestrator - sequences pulls across all requested sources.
//!
//! Per source the engine:
//! - stages an existing destination aside (rotation)
//! - estimates the remote size
//! - starts the pull process and a progress poller side by side
//! - commits or rolls back the rotation once the process exits
//!
//! Only one source is in flight at a time. Cancellation skips every source
//! not yet started and rolls back the one in flight.

pub mod supervisor;

use crate::config::TransferConfig;
use crate::device::size::estimate_remote_size;
use crate::device::{display_args, pull_args, push_args, remote_basename, DeviceBridge};
use crate::fs::rotation::BackupRotation;
use crate::fs::sanitize::sanitize_name;
use crate::transfer::poller::{JobPosition, ProgressPoller};
use crate::transfer::progress::ProgressSnapshot;
use crate::utils::errors::{Result, TransferError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use supervisor::{failure_message, TransferProcess};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Every source was attempted
    Completed,
    /// `cancel()` stopped the batch early
    Cancelled,
}

/// Terminal summary of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    pub request_id: Uuid,
    pub status: TransferStatus,
    /// `true` when no attempted source failed. A cancelled batch can still
    /// be successful; check `status` to tell the two apart.
    pub success: bool,
    /// `"<source>: <message>"` per failed source
    pub errors: Vec<String>,
    /// Sources transferred and committed
    pub completed: usize,
    /// Sources in the request
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
}

/// Per-request state shared by the orchestrator, supervisor and poller.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub request_id: Uuid,
    pub device_id: String,
    pub cancel: CancellationToken,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    fn new(device_id: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            cancel: CancellationToken::new(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome of one source.
#[derive(Debug)]
enum JobOutcome {
    Committed,
    Failed(String),
    Cancelled,
}

/// How the supervised process ended.
enum ProcessEnd {
    Exited(Result<ExitStatus>),
    Cancelled,
}

/// Clears the running flag when a request ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransferError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main transfer engine
pub struct TransferEngine {
    bridge: Arc<dyn DeviceBridge>,
    settings: TransferConfig,
    cancel_token: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl TransferEngine {
    pub fn new(bridge: Arc<dyn DeviceBridge>, settings: TransferConfig) -> Self {
        Self {
            bridge,
            settings,
            cancel_token: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Request cancellation of the transfer in flight.
    ///
    /// Idempotent, and a no-op when nothing is running: the next request
    /// starts with a fresh token.
    pub fn cancel(&self) {
        let token = self.current_token();
        if !token.is_cancelled() {
            info!("Cancellation requested");
            token.cancel();
        }
    }

    /// Whether the current (or last) request has been asked to stop.
    pub fn is_cancel_requested(&self) -> bool {
        self.current_token().is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn current_token(&self) -> CancellationToken {
        match self.cancel_token.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Start a request: fresh context, fresh cancellation token.
    fn begin(&self, device_id: &str) -> JobContext {
        let context = JobContext::new(device_id);
        match self.cancel_token.lock() {
            Ok(mut token) => *token = context.cancel.clone(),
            Err(poisoned) => *poisoned.into_inner() = context.cancel.clone(),
        }
        context
    }

    /// Pull every source into `destination_root`, one at a time.
    ///
    /// Each source lands at `destination_root/<sanitized basename>`. Source
    /// failures are collected into the report and never abort the batch.
    /// Only a concurrent request on the same engine or an empty device id is
    /// an error.
    pub async fn run_transfer<F>(
        &self,
        device_id: &str,
        sources: &[String],
        destination_root: &Path,
        mut on_progress: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(ProgressSnapshot),
    {
        validate_device_id(device_id)?;
        let _guard = RunGuard::acquire(&self.running)?;
        let ctx = self.begin(device_id);

        let span = info_span!("transfer", request_id = %ctx.request_id, device = device_id);
        async {
            info!(
                "Starting transfer of {} source(s) into {}",
                sources.len(),
                destination_root.display()
            );

            let total = sources.len();
            let mut errors = Vec::new();
            let mut completed = 0usize;
            let mut status = TransferStatus::Completed;

            for (index, source) in sources.iter().enumerate() {
                if ctx.is_cancelled() {
                    info!("Cancelled before source {} of {}, stopping", index + 1, total);
                    status = TransferStatus::Cancelled;
                    break;
                }

                let position = JobPosition {
                    current: index + 1,
                    total,
                    source: source.clone(),
                    request_started: ctx.started,
                };

                let outcome = self
                    .pull_source(&ctx, position, destination_root, &mut on_progress)
                    .instrument(info_span!("job", index = index + 1, source = %source))
                    .await;

                match outcome {
                    JobOutcome::Committed => completed += 1,
                    JobOutcome::Failed(message) => {
                        warn!("Transfer failed for {}: {}", source, message);
                        errors.push(format!("{}: {}", source, message));
                    }
                    JobOutcome::Cancelled => {
                        status = TransferStatus::Cancelled;
                        break;
                    }
                }
            }

            let report = self.report(&ctx, status, errors, completed, total);
            info!(
                status = ?report.status,
                completed = report.completed,
                failed = report.errors.len(),
                "Transfer finished in {}s",
                report.elapsed_secs
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Push one local file or directory to `remote_destination`.
    ///
    /// There is nothing to rotate or measure on the host side, so progress
    /// is qualitative until the final 100% snapshot.
    pub async fn run_restore<F>(
        &self,
        device_id: &str,
        local_source: &Path,
        remote_destination: &str,
        mut on_progress: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(ProgressSnapshot),
    {
        validate_device_id(device_id)?;
        let _guard = RunGuard::acquire(&self.running)?;
        let ctx = self.begin(device_id);
        let source = local_source.display().to_string();

        let span = info_span!("restore", request_id = %ctx.request_id, device = device_id);
        async {
            info!("Starting restore of {} to {}", source, remote_destination);

            let position = JobPosition {
                current: 1,
                total: 1,
                source: source.clone(),
                request_started: ctx.started,
            };
            let mut poller = ProgressPoller::qualitative(position, self.settings.poll_interval());
            on_progress(poller.started());

            let args = push_args(local_source, remote_destination);
            let outcome = match self
                .supervise(&ctx, args, &source, &mut poller, &mut on_progress)
                .await
            {
                Ok(()) => {
                    on_progress(poller.finished());
                    JobOutcome::Committed
                }
                Err(outcome) => outcome,
            };

            let mut errors = Vec::new();
            let mut completed = 0;
            let mut status = TransferStatus::Completed;
            match outcome {
                JobOutcome::Committed => completed = 1,
                JobOutcome::Failed(message) => {
                    warn!("Restore failed for {}: {}", source, message);
                    errors.push(format!("{}: {}", source, message));
                }
                JobOutcome::Cancelled => status = TransferStatus::Cancelled,
            }

            Ok(self.report(&ctx, status, errors, completed, 1))
        }
        .instrument(span)
        .await
    }

    /// Transfer a single source: rotate, estimate, pull, then commit or roll back.
    async fn pull_source<F>(
        &self,
        ctx: &JobContext,
        position: JobPosition,
        destination_root: &Path,
        on_progress: &mut F,
    ) -> JobOutcome
    where
        F: FnMut(ProgressSnapshot),
    {
        let source = position.source.clone();
        let destination = destination_for(destination_root, &source);

        if let Err(e) = tokio::fs::create_dir_all(destination_root).await {
            return JobOutcome::Failed(format!(
                "Failed to create {}: {}",
                destination_root.display(),
                e
            ));
        }

        let suffix = self.settings.backup_suffix.clone();
        let staged_for = destination.clone();
        let mut rotation = run_blocking(move || BackupRotation::stage(staged_for, &suffix)).await;

        let remote_size = estimate_remote_size(
            self.bridge.as_ref(),
            &ctx.device_id,
            &source,
            self.settings.command_timeout(),
        )
        .await;

        let mut poller = ProgressPoller::for_tree(
            position,
            destination.clone(),
            destination_root.to_path_buf(),
            remote_size,
            self.settings.poll_interval(),
        );
        on_progress(poller.started());

        let args = pull_args(&source, &destination);
        let result = self
            .supervise(ctx, args, &source, &mut poller, &mut *on_progress)
            .await;

        match result {
            Ok(()) => {
                let rotation = run_blocking(move || {
                    rotation.commit();
                    rotation
                })
                .await;
                info!(destination = %rotation.destination().display(), "Source committed");
                on_progress(poller.finished());
                JobOutcome::Committed
            }
            Err(outcome) => {
                run_blocking(move || rotation.rollback()).await;
                outcome
            }
        }
    }

    /// Run one external process with the poller beside it.
    ///
    /// `Ok(())` only for a zero exit with no cancellation observed. The
    /// process and the poller are both finished when this returns.
    async fn supervise<F>(
        &self,
        ctx: &JobContext,
        args: Vec<std::ffi::OsString>,
        source: &str,
        poller: &mut ProgressPoller,
        on_progress: &mut F,
    ) -> std::result::Result<(), JobOutcome>
    where
        F: FnMut(ProgressSnapshot),
    {
        if ctx.is_cancelled() {
            info!("Cancelled before the process started");
            return Err(JobOutcome::Cancelled);
        }

        info!("Running: {}", display_args(&args));
        let command = self.bridge.command(&ctx.device_id, &args);
        let mut process = match TransferProcess::spawn(command, source) {
            Ok(process) => process,
            Err(e) => {
                error!("Could not start transfer process: {}", e);
                return Err(JobOutcome::Failed(e.to_string()));
            }
        };

        let end = tokio::select! {
            status = process.wait() => ProcessEnd::Exited(status),
            _ = ctx.cancel.cancelled() => ProcessEnd::Cancelled,
            never = poller.run(on_progress) => match never {},
        };

        match end {
            ProcessEnd::Cancelled => {
                process.cancel(self.settings.kill_grace()).await;
                info!("Transfer cancelled, process terminated");
                Err(JobOutcome::Cancelled)
            }
            ProcessEnd::Exited(status) => {
                let output = process.finish().await;

                if ctx.is_cancelled() {
                    info!("Cancellation observed at process exit");
                    return Err(JobOutcome::Cancelled);
                }

                match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => Err(JobOutcome::Failed(failure_message(status, &output))),
                    Err(e) => Err(JobOutcome::Failed(e.to_string())),
                }
            }
        }
    }

    fn report(
        &self,
        ctx: &JobContext,
        status: TransferStatus,
        errors: Vec<String>,
        completed: usize,
        total: usize,
    ) -> TransferReport {
        TransferReport {
            request_id: ctx.request_id,
            status,
            success: errors.is_empty(),
            errors,
            completed,
            total,
            started_at: ctx.started_at,
            elapsed_secs: ctx.started.elapsed().as_secs(),
        }
    }
}

fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.trim().is_empty() {
        return Err(TransferError::InvalidRequest(
            "device id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run blocking filesystem work off the async threads, re-raising panics.
async fn run_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

/// Destination a source would be pulled to under `destination_root`.
pub fn destination_for(destination_root: &Path, source: &str) -> PathBuf {
    destination_root.join(sanitize_name(remote_basename(source)))
}
