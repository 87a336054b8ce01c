use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Collects diagnostic statistics for a capture session.
///
/// Updated from the driver callback thread and read from the client thread,
/// so every counter is atomic.
#[derive(Debug)]
pub struct CaptureStats {
    frames_received: AtomicU64,
    frames_converted: AtomicU64,
    signal_lost_frames: AtomicU64,
    conversion_drops: AtomicU64,
    format_changes: AtomicU64,
    total_bytes: AtomicU64,
    start_time: Mutex<Instant>,
}

/// Snapshot of capture stats for serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub fps: f64,
    pub frames_received: u64,
    pub frames_converted: u64,
    pub signal_lost_frames: u64,
    pub conversion_drops: u64,
    pub format_changes: u64,
    pub drop_rate: f64,
    pub bandwidth_bps: u64,
}

impl CaptureStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_converted: AtomicU64::new(0),
            signal_lost_frames: AtomicU64::new(0),
            conversion_drops: AtomicU64::new(0),
            format_changes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            start_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a frame delivered by the driver, with its payload size.
    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_converted(&self) {
        self.frames_converted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_lost(&self) {
        self.signal_lost_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped because conversion failed.
    pub fn record_drop(&self) {
        self.conversion_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_change(&self) {
        self.format_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Converted frames per second since the last reset.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.lock().elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.frames_converted.load(Ordering::Relaxed) as f64 / elapsed
    }

    /// Conversion drop rate as a percentage (0.0 - 100.0).
    pub fn drop_rate(&self) -> f64 {
        let drops = self.conversion_drops.load(Ordering::Relaxed);
        let total = self.frames_converted.load(Ordering::Relaxed) + drops;
        if total == 0 {
            return 0.0;
        }
        (drops as f64 / total as f64) * 100.0
    }

    /// Raw input bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.lock().elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes.load(Ordering::Relaxed) as f64 / elapsed) as u64
    }

    /// Reset all counters and restart the clock.
    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_converted,
            &self.signal_lost_frames,
            &self.conversion_drops,
            &self.format_changes,
            &self.total_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.start_time.lock() = Instant::now();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.fps(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_converted: self.frames_converted.load(Ordering::Relaxed),
            signal_lost_frames: self.signal_lost_frames.load(Ordering::Relaxed),
            conversion_drops: self.conversion_drops.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
            drop_rate: self.drop_rate(),
            bandwidth_bps: self.bandwidth_bps(),
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}
