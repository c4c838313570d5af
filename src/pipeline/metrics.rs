// src/pipeline/metrics.rs
//
// Session counters. Shared via Arc so the signal tasks and the final
// summary can read them while the frame loop runs on a blocking thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub frames_read: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub unreadable_frames: Arc<AtomicU64>,
    pub vehicles_checked: Arc<AtomicU64>,
    pub violations: Arc<AtomicU64>,
    pub resets: Arc<AtomicU64>,
    pub detect_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            frames_read: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            unreadable_frames: Arc::new(AtomicU64::new(0)),
            vehicles_checked: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            resets: Arc::new(AtomicU64::new(0)),
            detect_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Last detector call duration.
    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            unreadable_frames: self.unreadable_frames.load(Ordering::Relaxed),
            vehicles_checked: self.vehicles_checked.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            last_detect_us: self.detect_time_us.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub unreadable_frames: u64,
    pub vehicles_checked: u64,
    pub violations: u64,
    pub resets: u64,
    pub last_detect_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = SessionMetrics::new();
        let handle = metrics.clone();
        handle.inc(&handle.frames_read);
        handle.inc(&handle.vehicles_checked);
        handle.inc(&handle.vehicles_checked);

        let summary = metrics.summary();
        assert_eq!(summary.frames_read, 1);
        assert_eq!(summary.vehicles_checked, 2);
        assert_eq!(summary.violations, 0);
    }
}
