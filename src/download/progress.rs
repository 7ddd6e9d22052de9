//! Throttled download progress
//!
//! Multi-gigabyte jobs would otherwise produce an update per network chunk.
//! Updates are emitted only when the aggregate percentage has advanced by a
//! step that shrinks as the job grows.

use serde::Serialize;

const GB: u64 = 1_000_000_000;

/// Progress of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    /// File currently transferring, relative to the install directory
    pub file: String,
    pub file_percent: f64,
    pub total_percent: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

/// Minimum aggregate advance, in percent, between two updates
pub fn progress_step(total_bytes: u64) -> f64 {
    match total_bytes {
        b if b > 20 * GB => 0.05,
        b if b > 10 * GB => 0.1,
        b if b > 5 * GB => 0.2,
        _ => 0.3,
    }
}

/// Aggregate byte counter for a job
///
/// Reported `total_percent` never decreases, even when a file restarts
/// from zero and its bytes are rewound.
#[derive(Debug)]
pub struct ProgressTracker {
    total_bytes: u64,
    downloaded: u64,
    step: f64,
    last_reported: Option<f64>,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            downloaded: 0,
            step: progress_step(total_bytes),
            last_reported: None,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn advance(&mut self, bytes: u64) {
        self.downloaded = self.downloaded.saturating_add(bytes).min(self.total_bytes);
    }

    /// Forget bytes of a partial file that is being fetched again
    pub fn rewind(&mut self, bytes: u64) {
        self.downloaded = self.downloaded.saturating_sub(bytes);
    }

    fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.downloaded as f64 * 100.0 / self.total_bytes as f64
    }

    /// Snapshot when the aggregate advanced by at least one step since the
    /// last report, or reached 100%
    pub fn report(&mut self, file: &str, file_done: u64, file_total: u64) -> Option<DownloadProgress> {
        let percent = self.percent();
        let due = match self.last_reported {
            None => true,
            Some(last) => percent >= last + self.step || (percent >= 100.0 && last < 100.0),
        };
        if !due {
            return None;
        }

        self.last_reported = Some(percent);
        Some(DownloadProgress {
            file: file.to_string(),
            file_percent: if file_total == 0 {
                100.0
            } else {
                (file_done as f64 * 100.0 / file_total as f64).min(100.0)
            },
            total_percent: percent,
            bytes_downloaded: self.downloaded,
            total_bytes: self.total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_by_size() {
        assert_eq!(progress_step(25 * GB), 0.05);
        assert_eq!(progress_step(12 * GB), 0.1);
        assert_eq!(progress_step(6 * GB), 0.2);
        assert_eq!(progress_step(5 * GB), 0.3);
        assert_eq!(progress_step(1024), 0.3);
    }

    #[test]
    fn test_report_throttled() {
        let mut tracker = ProgressTracker::new(10_000);
        assert!(tracker.report("unet/model.onnx", 0, 10_000).is_some());

        // 0.1% is below the 0.3% step
        tracker.advance(10);
        assert!(tracker.report("unet/model.onnx", 10, 10_000).is_none());

        tracker.advance(20);
        let progress = tracker.report("unet/model.onnx", 30, 10_000).unwrap();
        assert!((progress.total_percent - 0.3).abs() < 1e-9);
        assert_eq!(progress.bytes_downloaded, 30);
    }

    #[test]
    fn test_completion_always_reported() {
        let mut tracker = ProgressTracker::new(1_000);
        tracker.advance(999);
        assert!(tracker.report("model.onnx", 999, 1_000).is_some());
        tracker.advance(1);
        let done = tracker.report("model.onnx", 1_000, 1_000).unwrap();
        assert_eq!(done.total_percent, 100.0);
        assert_eq!(done.file_percent, 100.0);
        assert!(tracker.report("model.onnx", 1_000, 1_000).is_none());
    }

    #[test]
    fn test_rewind_never_lowers_reported_percent() {
        let mut tracker = ProgressTracker::new(1_000);
        tracker.advance(500);
        let before = tracker.report("a", 500, 1_000).unwrap().total_percent;

        tracker.rewind(500);
        tracker.advance(100);
        assert!(tracker.report("a", 100, 1_000).is_none());

        tracker.advance(500);
        let after = tracker.report("a", 600, 1_000).unwrap().total_percent;
        assert!(after >= before);
    }

    #[test]
    fn test_advance_clamped_to_total() {
        let mut tracker = ProgressTracker::new(100);
        tracker.advance(250);
        assert_eq!(tracker.downloaded(), 100);
    }
}
