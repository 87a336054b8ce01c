use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Single-slot mailbox between the driver callback and the polling client.
///
/// Holds at most one unread "new frame" flag. Publishing over an unread
/// frame replaces it; the producer never waits for the consumer.
#[derive(Debug, Default)]
pub struct FrameExchange {
    ready: AtomicBool,
    /// Every frame the driver delivered, including signal-loss frames.
    frame_count: AtomicU64,
    /// Monotonic counter incremented on each publish.
    sequence: AtomicU64,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a freshly converted frame as available.
    pub fn publish(&self) {
        self.sequence.fetch_add(1, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// Whether a frame was published since the last poll. Clears the flag.
    pub fn poll(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }

    /// Count one delivered frame.
    pub fn record_frame(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Number of publishes since the last reset.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Clear the flag and both counters.
    pub fn reset(&self) {
        self.ready.store(false, Ordering::Release);
        self.frame_count.store(0, Ordering::Relaxed);
        self.sequence.store(0, Ordering::Relaxed);
    }
}
