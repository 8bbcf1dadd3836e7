//! Periodic progress sampling for one transfer job.
//!
//! The poller lives exactly as long as one job's external process. On every
//! tick it measures the destination tree, derives speed, percent and ETA,
//! and hands a [`ProgressSnapshot`] to the caller's sink.

use super::progress::{
    estimate_eta, format_speed, instantaneous_speed, overall_percent, qualitative_eta,
    PollSample, ProgressSnapshot, CALCULATING,
};
use crate::fs::walker::{scan_tree, TreeScan};
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

/// Where a job sits in its request, shared by every snapshot it emits.
#[derive(Debug, Clone)]
pub struct JobPosition {
    /// 1-based index of the job
    pub current: usize,
    pub total: usize,
    /// Source path, shown until a written file can be named
    pub source: String,
    pub request_started: Instant,
}

impl JobPosition {
    fn items_remaining(&self) -> usize {
        self.total.saturating_sub(self.current)
    }
}

/// What the poller measures on each tick.
#[derive(Debug, Clone)]
enum PollTarget {
    /// A local tree being written, and the root display names are relative to
    LocalTree { tree: PathBuf, display_root: PathBuf },
    /// Nothing measurable locally (pushes); progress stays qualitative
    Opaque,
}

pub struct ProgressPoller {
    position: JobPosition,
    target: PollTarget,
    remote_size: u64,
    interval: Duration,
    job_started: Instant,
    previous: PollSample,
    speed: String,
    percent: u8,
    current_file: String,
}

impl ProgressPoller {
    /// Poller measuring `tree`, with display names relative to `display_root`.
    /// A `remote_size` of 0 means the size is unknown.
    pub fn for_tree(
        position: JobPosition,
        tree: PathBuf,
        display_root: PathBuf,
        remote_size: u64,
        interval: Duration,
    ) -> Self {
        Self::new(position, PollTarget::LocalTree { tree, display_root }, remote_size, interval)
    }

    /// Poller for a transfer whose progress cannot be measured locally.
    pub fn qualitative(position: JobPosition, interval: Duration) -> Self {
        Self::new(position, PollTarget::Opaque, 0, interval)
    }

    fn new(position: JobPosition, target: PollTarget, remote_size: u64, interval: Duration) -> Self {
        let now = Instant::now();
        let current_file = position.source.clone();
        Self {
            position,
            target,
            remote_size,
            interval,
            job_started: now,
            previous: PollSample::new(0, now),
            speed: String::new(),
            percent: 0,
            current_file,
        }
    }

    /// Snapshot emitted when the job begins.
    pub fn started(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current: self.position.current,
            total: self.position.total,
            current_file: self.position.source.clone(),
            speed: CALCULATING.to_string(),
            eta: CALCULATING.to_string(),
            overall_percent: 0,
            file_percent: 0,
            elapsed_secs: self.position.request_started.elapsed().as_secs(),
        }
    }

    /// Snapshot emitted once the job is confirmed complete.
    pub fn finished(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current: self.position.current,
            total: self.position.total,
            current_file: self.current_file.clone(),
            speed: self.display_speed(),
            eta: qualitative_eta(self.position.items_remaining()),
            overall_percent: 100,
            file_percent: 0,
            elapsed_secs: self.position.request_started.elapsed().as_secs(),
        }
    }

    /// Fold one tree measurement taken at `now` into the running state.
    pub fn observe(&mut self, scan: &TreeScan, now: Instant) -> ProgressSnapshot {
        let sample = PollSample::new(scan.total_bytes, now);

        if let Some(bytes_per_second) = instantaneous_speed(&self.previous, &sample) {
            self.speed = format_speed(bytes_per_second);
        }
        self.previous = sample;

        self.percent = self
            .percent
            .max(overall_percent(scan.total_bytes, self.remote_size));

        if let PollTarget::LocalTree { display_root, .. } = &self.target {
            if let Some(rel) = scan.latest_relative_to(display_root) {
                self.current_file = rel.to_string_lossy().into_owned();
            }
        }

        let eta = estimate_eta(
            scan.total_bytes,
            self.remote_size,
            now.saturating_duration_since(self.job_started),
            self.position.items_remaining(),
        );

        trace!(
            bytes = scan.total_bytes,
            remote = self.remote_size,
            percent = self.percent,
            "Progress sample"
        );

        ProgressSnapshot {
            current: self.position.current,
            total: self.position.total,
            current_file: self.current_file.clone(),
            speed: self.display_speed(),
            eta,
            overall_percent: self.percent,
            file_percent: 0,
            elapsed_secs: now
                .saturating_duration_since(self.position.request_started)
                .as_secs(),
        }
    }

    /// Sample on a fixed cadence until the future is dropped.
    ///
    /// The first sample is taken one interval after the call. Failed samples
    /// are skipped and retried on the next tick.
    pub async fn run<F>(&mut self, on_progress: &mut F) -> Infallible
    where
        F: FnMut(ProgressSnapshot),
    {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Some(snapshot) = self.tick().await {
                on_progress(snapshot);
            }
        }
    }

    async fn tick(&mut self) -> Option<ProgressSnapshot> {
        let tree = match &self.target {
            PollTarget::LocalTree { tree, .. } => tree.clone(),
            PollTarget::Opaque => return Some(self.observe(&TreeScan::default(), Instant::now())),
        };

        match tokio::task::spawn_blocking(move || scan_tree(&tree)).await {
            Ok(scan) => Some(self.observe(&scan, Instant::now())),
            Err(e) => {
                warn!("Progress scan failed, retrying next tick: {}", e);
                None
            }
        }
    }

    fn display_speed(&self) -> String {
        if self.speed.is_empty() {
            CALCULATING.to_string()
        } else {
            self.speed.clone()
        }
    }
}
