// Progress aggregation: mutex-protected run counters and the immutable
// snapshots computed from them.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Phase of a download run as reported to the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Immutable progress value emitted to the caller's sink.
///
/// `file_size` is set only on the terminal `completed` snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: DownloadStatus,
    pub percent: f64,
    pub downloaded_segments: usize,
    pub total_segments: usize,
    pub failed_segments: usize,
    pub bytes_downloaded: u64,
    pub speed_mbps: f64,
    pub speed_segments: f64,
    pub eta_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub errors: Vec<String>,
}

/// Caller-supplied snapshot sink.
///
/// Invoked synchronously from worker task context while the counters lock
/// is held, possibly concurrently from several workers over the run. It
/// must not block indefinitely; any throttling (e.g. towards a persistence
/// layer) is the caller's responsibility.
pub type ProgressSink = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

#[derive(Debug, Default)]
struct RunCounters {
    downloaded: usize,
    failed: usize,
    bytes_downloaded: u64,
    errors: Vec<String>,
}

/// Holds the run counters behind a single mutex and turns them into
/// snapshots.
///
/// Snapshots are emitted while the lock is still held: a snapshot always
/// reflects exactly the counter state that produced it, and per-worker
/// callback order matches that worker's completion order.
pub struct ProgressAggregator {
    total_segments: usize,
    cached_at_start: usize,
    initial_bytes: u64,
    start_time: Instant,
    counters: Mutex<RunCounters>,
    sink: Option<ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(
        total_segments: usize,
        cached_at_start: usize,
        initial_bytes: u64,
        sink: Option<ProgressSink>,
    ) -> Self {
        Self {
            total_segments,
            cached_at_start,
            initial_bytes,
            start_time: Instant::now(),
            counters: Mutex::new(RunCounters {
                downloaded: cached_at_start,
                failed: 0,
                bytes_downloaded: initial_bytes,
                errors: Vec::new(),
            }),
            sink,
        }
    }

    /// Record one completed segment and emit a `downloading` snapshot
    /// before the lock is released.
    pub fn record_success(&self, bytes: u64) {
        let mut counters = self.counters.lock();
        counters.downloaded += 1;
        counters.bytes_downloaded += bytes;
        let snapshot = self.compute(&counters, DownloadStatus::Downloading, None);
        self.emit(&snapshot);
    }

    /// Record a segment whose retry budget is exhausted. No snapshot is
    /// emitted; the failure surfaces in the run's terminal snapshot.
    pub fn record_failure(&self, index: usize, reason: &str) {
        let mut counters = self.counters.lock();
        counters.failed += 1;
        counters.errors.push(format!("segment {index}: {reason}"));
    }

    /// Append a run-level error (e.g. a merge failure reason) to the
    /// aggregated error list.
    pub fn record_error(&self, message: impl Into<String>) {
        self.counters.lock().errors.push(message.into());
    }

    /// Current (downloaded, failed) counts.
    pub fn counts(&self) -> (usize, usize) {
        let counters = self.counters.lock();
        (counters.downloaded, counters.failed)
    }

    /// Compute a snapshot for the given status without emitting it.
    pub fn snapshot(&self, status: DownloadStatus, file_size: Option<u64>) -> ProgressSnapshot {
        let counters = self.counters.lock();
        self.compute(&counters, status, file_size)
    }

    /// Compute a snapshot and emit it through the sink, inside the lock.
    pub fn publish(&self, status: DownloadStatus, file_size: Option<u64>) -> ProgressSnapshot {
        let counters = self.counters.lock();
        let snapshot = self.compute(&counters, status, file_size);
        self.emit(&snapshot);
        snapshot
    }

    fn emit(&self, snapshot: &ProgressSnapshot) {
        if let Some(sink) = &self.sink {
            sink(snapshot);
        }
    }

    fn compute(
        &self,
        counters: &RunCounters,
        status: DownloadStatus,
        file_size: Option<u64>,
    ) -> ProgressSnapshot {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let percent = if self.total_segments > 0 {
            counters.downloaded as f64 / self.total_segments as f64 * 100.0
        } else {
            0.0
        };

        let fresh_bytes = counters.bytes_downloaded.saturating_sub(self.initial_bytes);
        let average_mbps = if elapsed > 0.0 {
            fresh_bytes as f64 / MIB / elapsed
        } else {
            0.0
        };

        let (speed_segments, speed_mbps, eta_seconds) = match status {
            DownloadStatus::Downloading => {
                let fresh_segments = counters.downloaded.saturating_sub(self.cached_at_start);
                let speed_segments = if elapsed > 0.0 {
                    fresh_segments as f64 / elapsed
                } else {
                    0.0
                };
                let remaining = self.total_segments.saturating_sub(counters.downloaded);
                let eta_seconds = if speed_segments > 0.0 {
                    (remaining as f64 / speed_segments) as u64
                } else {
                    0
                };
                (speed_segments, average_mbps, eta_seconds)
            }
            // The completed snapshot reports the run's mean throughput over
            // non-cached bytes; other terminal/phase snapshots carry zeroes.
            DownloadStatus::Completed => (0.0, average_mbps, 0),
            _ => (0.0, 0.0, 0),
        };

        ProgressSnapshot {
            status,
            percent,
            downloaded_segments: counters.downloaded,
            total_segments: self.total_segments,
            failed_segments: counters.failed,
            bytes_downloaded: counters.bytes_downloaded,
            speed_mbps,
            speed_segments,
            eta_seconds,
            file_size,
            errors: counters.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn success_updates_counts_and_percent() {
        let aggregator = ProgressAggregator::new(10, 0, 0, None);
        aggregator.record_success(1000);
        aggregator.record_success(500);

        let snapshot = aggregator.snapshot(DownloadStatus::Downloading, None);
        assert_eq!(snapshot.downloaded_segments, 2);
        assert_eq!(snapshot.bytes_downloaded, 1500);
        assert!((snapshot.percent - 20.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.failed_segments, 0);
    }

    #[test]
    fn counters_start_from_cached_state() {
        let aggregator = ProgressAggregator::new(10, 7, 7000, None);
        let (downloaded, failed) = aggregator.counts();
        assert_eq!(downloaded, 7);
        assert_eq!(failed, 0);

        let snapshot = aggregator.snapshot(DownloadStatus::Downloading, None);
        assert!((snapshot.percent - 70.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.bytes_downloaded, 7000);
    }

    #[test]
    fn failure_records_index_and_cause() {
        let aggregator = ProgressAggregator::new(10, 0, 0, None);
        aggregator.record_failure(5, "HTTP 404 Not Found");

        let snapshot = aggregator.snapshot(DownloadStatus::Failed, None);
        assert_eq!(snapshot.failed_segments, 1);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.errors[0].contains("segment 5"));
        assert!(snapshot.errors[0].contains("404"));
    }

    #[test]
    fn sink_fires_once_per_success_with_matching_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_sink = Arc::clone(&calls);
        let sink: ProgressSink = Arc::new(move |snapshot: &ProgressSnapshot| {
            let seen = calls_in_sink.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(snapshot.downloaded_segments, seen);
            assert_eq!(snapshot.status, DownloadStatus::Downloading);
        });

        let aggregator = ProgressAggregator::new(3, 0, 0, Some(sink));
        aggregator.record_success(10);
        aggregator.record_success(10);
        aggregator.record_success(10);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failures_do_not_emit_snapshots() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_sink = Arc::clone(&calls);
        let sink: ProgressSink = Arc::new(move |_: &ProgressSnapshot| {
            calls_in_sink.fetch_add(1, Ordering::SeqCst);
        });

        let aggregator = ProgressAggregator::new(3, 0, 0, Some(sink));
        aggregator.record_failure(0, "timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_downloading_phases_zero_the_instantaneous_speeds() {
        let aggregator = ProgressAggregator::new(2, 0, 0, None);
        aggregator.record_success(1024);
        aggregator.record_success(1024);

        let merging = aggregator.snapshot(DownloadStatus::Merging, None);
        assert_eq!(merging.speed_segments, 0.0);
        assert_eq!(merging.speed_mbps, 0.0);
        assert_eq!(merging.eta_seconds, 0);
        assert!((merging.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn completed_snapshot_carries_file_size_and_serializes() {
        let aggregator = ProgressAggregator::new(1, 0, 0, None);
        aggregator.record_success(42);

        let snapshot = aggregator.snapshot(DownloadStatus::Completed, Some(4096));
        assert_eq!(snapshot.file_size, Some(4096));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["file_size"], 4096);
        assert_eq!(json["total_segments"], 1);
    }
}
