//! Progress snapshots and the speed/ETA arithmetic behind them.
//!
//! Everything here is pure: callers pass samples and elapsed times in, so the
//! formatting rules can be tested without clocks or a filesystem.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Shown while no throughput has been observed yet.
pub const CALCULATING: &str = "Calculating...";

/// Qualitative ETA when nothing numeric can be derived.
pub const TRANSFERRING: &str = "Transferring...";

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// One progress update, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 1-based position of the active source
    pub current: usize,

    /// Number of sources in the request
    pub total: usize,

    /// Display name of the file most recently written, or the source path
    pub current_file: String,

    /// Formatted throughput, e.g. "2.0 MB/s"
    pub speed: String,

    /// Formatted remaining time, e.g. "~2m 0s remaining"
    pub eta: String,

    /// Percent of the active source, 0-100. Only reaches 100 once the job is
    /// confirmed complete.
    pub overall_percent: u8,

    /// Reserved for per-file progress
    pub file_percent: u8,

    /// Seconds since the request began
    pub elapsed_secs: u64,
}

/// A measurement of the local tree at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSample {
    pub bytes: u64,
    pub at: Instant,
}

impl PollSample {
    pub fn new(bytes: u64, at: Instant) -> Self {
        Self { bytes, at }
    }
}

/// Bytes per second between two samples.
///
/// `None` unless the byte delta and the time delta are both positive, so a
/// quiet interval never replaces the last displayed speed with zero.
pub fn instantaneous_speed(previous: &PollSample, current: &PollSample) -> Option<f64> {
    let bytes = current.bytes.checked_sub(previous.bytes).filter(|b| *b > 0)?;
    let secs = current.at.checked_duration_since(previous.at)?.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some(bytes as f64 / secs)
}

/// Format a throughput; non-positive values format to an empty string.
pub fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second.is_nan() || bytes_per_second <= 0.0 {
        String::new()
    } else if bytes_per_second >= MIB {
        format!("{:.1} MB/s", bytes_per_second / MIB)
    } else if bytes_per_second >= KIB {
        format!("{} KB/s", (bytes_per_second / KIB).round() as u64)
    } else {
        format!("{} B/s", bytes_per_second.round() as u64)
    }
}

/// Format remaining seconds as `~Ns remaining` or `~Mm Ss remaining`.
pub fn format_eta(seconds: u64) -> String {
    if seconds < 60 {
        format!("~{}s remaining", seconds)
    } else {
        format!("~{}m {}s remaining", seconds / 60, seconds % 60)
    }
}

/// Fallback ETA text used when the remote size or throughput is unknown.
pub fn qualitative_eta(items_remaining: usize) -> String {
    if items_remaining > 0 {
        format!("{} items remaining", items_remaining)
    } else {
        TRANSFERRING.to_string()
    }
}

/// Remaining-time estimate for a job.
///
/// Uses the average throughput since the job started (not the instantaneous
/// delta) against `remote_size - current_size`. Falls back to
/// [`qualitative_eta`] when the remote size is unknown (0), no time has
/// elapsed, or nothing has been written yet.
pub fn estimate_eta(
    current_size: u64,
    remote_size: u64,
    job_elapsed: Duration,
    items_remaining: usize,
) -> String {
    let secs = job_elapsed.as_secs_f64();
    if remote_size == 0 || secs <= 0.0 || current_size == 0 {
        return qualitative_eta(items_remaining);
    }

    let average = current_size as f64 / secs;
    let remaining = remote_size.saturating_sub(current_size);
    format_eta((remaining as f64 / average).round() as u64)
}

/// Percent of the remote estimate present locally, capped at 99 while the
/// transfer is in flight. 0 when the remote size is unknown.
pub fn overall_percent(current_size: u64, remote_size: u64) -> u8 {
    if remote_size == 0 {
        return 0;
    }
    let percent = (current_size as f64 / remote_size as f64 * 100.0).round();
    percent.min(99.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(bytes_before: u64, bytes_after: u64, millis: u64) -> (PollSample, PollSample) {
        let start = Instant::now();
        (
            PollSample::new(bytes_before, start),
            PollSample::new(bytes_after, start + Duration::from_millis(millis)),
        )
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2_097_152.0), "2.0 MB/s");
        assert_eq!(format_speed(2_048.0), "2 KB/s");
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(1_572_864.0), "1.5 MB/s");
        assert_eq!(format_speed(1_024.0), "1 KB/s");
    }

    #[test]
    fn test_format_speed_non_positive_is_empty() {
        assert_eq!(format_speed(0.0), "");
        assert_eq!(format_speed(-10.0), "");
        assert_eq!(format_speed(f64::NAN), "");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(120), "~2m 0s remaining");
        assert_eq!(format_eta(45), "~45s remaining");
        assert_eq!(format_eta(0), "~0s remaining");
        assert_eq!(format_eta(61), "~1m 1s remaining");
        assert_eq!(format_eta(3725), "~62m 5s remaining");
    }

    #[test]
    fn test_instantaneous_speed() {
        let (a, b) = samples(1_000, 3_000, 500);
        let speed = instantaneous_speed(&a, &b).unwrap();
        assert!((speed - 4_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_instantaneous_speed_ignores_quiet_or_shrinking_intervals() {
        let (a, b) = samples(5_000, 5_000, 500);
        assert_eq!(instantaneous_speed(&a, &b), None);

        let (a, b) = samples(5_000, 4_000, 500);
        assert_eq!(instantaneous_speed(&a, &b), None);

        let (a, b) = samples(0, 4_000, 0);
        assert_eq!(instantaneous_speed(&a, &b), None);
    }

    #[test]
    fn test_estimate_eta_uses_job_average() {
        // 10 MiB written in 10s => 1 MiB/s average; 120 MiB left => 120s
        let eta = estimate_eta(10 * 1_048_576, 130 * 1_048_576, Duration::from_secs(10), 0);
        assert_eq!(eta, "~2m 0s remaining");

        // 45s left at the same average
        let eta = estimate_eta(10 * 1_048_576, 55 * 1_048_576, Duration::from_secs(10), 0);
        assert_eq!(eta, "~45s remaining");
    }

    #[test]
    fn test_estimate_eta_floors_remaining_at_zero() {
        let eta = estimate_eta(2_000, 1_000, Duration::from_secs(1), 0);
        assert_eq!(eta, "~0s remaining");
    }

    #[test]
    fn test_estimate_eta_degraded_mode_is_qualitative() {
        // Unknown remote size while local size keeps growing
        assert_eq!(
            estimate_eta(50 * 1_048_576, 0, Duration::from_secs(30), 2),
            "2 items remaining"
        );
        assert_eq!(estimate_eta(50 * 1_048_576, 0, Duration::from_secs(30), 0), TRANSFERRING);

        // No elapsed time yet
        assert_eq!(estimate_eta(1_000, 10_000, Duration::ZERO, 0), TRANSFERRING);

        // Nothing written yet
        assert_eq!(estimate_eta(0, 10_000, Duration::from_secs(3), 1), "1 items remaining");
    }

    #[test]
    fn test_overall_percent() {
        assert_eq!(overall_percent(0, 1_000), 0);
        assert_eq!(overall_percent(500, 1_000), 50);
        assert_eq!(overall_percent(994, 1_000), 99);
        assert_eq!(overall_percent(1_000, 1_000), 99);
        assert_eq!(overall_percent(5_000, 1_000), 99);
        assert_eq!(overall_percent(5_000, 0), 0);
    }

    #[test]
    fn test_snapshot_serializes_snake_case_fields() {
        let snapshot = ProgressSnapshot {
            current: 1,
            total: 3,
            current_file: "DCIM/Camera/IMG_0001.jpg".to_string(),
            speed: "2.0 MB/s".to_string(),
            eta: "~45s remaining".to_string(),
            overall_percent: 40,
            file_percent: 0,
            elapsed_secs: 12,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["overall_percent"], 40);
        assert_eq!(json["current_file"], "DCIM/Camera/IMG_0001.jpg");
    }
}
