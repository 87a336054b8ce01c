//! Driver-facing half of a capture session.
//!
//! The sink is registered with the driver and invoked on the driver's
//! thread. It only holds a weak reference to the session, so a sink the
//! driver still owns never keeps a closed session alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use tracing::{debug, error, info, trace, warn};

use crate::device::api::{DeckLinkApi, InputCallback};
use crate::device::types::{DetectedSignalFlags, DisplayMode, FormatChangedEvents, RawFrame};

use super::session::SessionCore;

pub struct FrameCallbackSink<A: DeckLinkApi + ?Sized + 'static> {
    core: Weak<SessionCore<A>>,
    /// Whether the last frame had no input signal; warnings fire on change.
    signal_lost: AtomicBool,
}

impl<A: DeckLinkApi + ?Sized + 'static> FrameCallbackSink<A> {
    pub(crate) fn new(core: Weak<SessionCore<A>>) -> Self {
        Self {
            core,
            signal_lost: AtomicBool::new(false),
        }
    }

    /// Convert and publish one frame. Signal-loss frames are only counted.
    pub fn on_frame_arrived(&self, frame: &RawFrame<'_>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let number = core.exchange.frame_count();
        core.stats.record_received(frame.payload_len());

        if !frame.has_input_signal() {
            core.stats.record_signal_lost();
            if !self.signal_lost.swap(true, Ordering::Relaxed) {
                warn!("Frame #{number}: no input signal detected");
            } else {
                trace!("Frame #{number}: still no input signal");
            }
            core.exchange.record_frame();
            return;
        }
        if self.signal_lost.swap(false, Ordering::Relaxed) {
            info!("Frame #{number}: input signal restored");
        }

        match frame.timecode {
            Some(timecode) => trace!("Frame #{number} ({}x{}) {timecode}", frame.width, frame.height),
            None => trace!("Frame #{number} ({}x{})", frame.width, frame.height),
        }

        // The client holds the converter while it waits on a read-back.
        let Some(mut converter) = core.converter.try_lock() else {
            core.stats.record_drop();
            debug!("Frame #{number} dropped: converter busy with read-back");
            core.exchange.record_frame();
            return;
        };
        let result = converter.convert(frame.bytes, frame.row_bytes, frame.width, frame.height);
        drop(converter);
        match result {
            Ok(()) => {
                core.stats.record_converted();
                core.exchange.publish();
            }
            Err(e) => {
                core.stats.record_drop();
                warn!("Frame #{number} dropped: {e}");
            }
        }
        core.exchange.record_frame();
    }

    /// Follow a signal format change by renegotiating the session.
    pub fn on_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &DisplayMode,
        detected: DetectedSignalFlags,
    ) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        info!(
            "Video format changed to {} ({}x{} @ {:.2} fps, events {:#x}, signal {:#x})",
            mode.name,
            mode.width,
            mode.height,
            mode.fps(),
            events.0,
            detected.0
        );
        core.stats.record_format_change();
        if let Err(e) = core.reconfigure(mode) {
            error!("Could not follow format change to {}: {e}", mode.name);
        }
    }
}

impl<A: DeckLinkApi + ?Sized + 'static> InputCallback for FrameCallbackSink<A> {
    fn video_input_frame_arrived(&self, frame: &RawFrame<'_>) {
        self.on_frame_arrived(frame);
    }

    fn video_input_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &DisplayMode,
        detected: DetectedSignalFlags,
    ) {
        self.on_format_changed(events, mode, detected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::capture::session::CaptureSession;
    use crate::convert::cpu::CpuConverter;
    use crate::device::mock::MockDeckLink;
    use crate::device::types::{DisplayModeId, InputFlags, PixelFormat};

    fn streaming_session() -> CaptureSession<MockDeckLink> {
        let api = Arc::new(MockDeckLink::new().with_devices(1));
        let session = CaptureSession::new(api, Box::new(CpuConverter::new()));
        session
            .open(0, DisplayModeId::PAL, PixelFormat::Bgra8, InputFlags::empty())
            .unwrap();
        session
    }

    #[test]
    fn dead_session_is_ignored() {
        let sink: FrameCallbackSink<MockDeckLink> = FrameCallbackSink::new(Weak::new());
        let bytes = [0u8; 4];
        sink.on_frame_arrived(&RawFrame::new(1, 1, 4, &bytes));
        let pal = DisplayMode::standard(DisplayModeId::PAL).unwrap();
        sink.on_format_changed(
            FormatChangedEvents::DISPLAY_MODE_CHANGED,
            &pal,
            DetectedSignalFlags::empty(),
        );
    }

    #[test]
    fn signal_loss_then_recovery() {
        let session = streaming_session();
        let sink = session.sink();
        let bytes = vec![0u8; 720 * 4 * 576];
        let lost = RawFrame::no_signal(720, 576, 720 * 4, &bytes);
        let good = RawFrame::new(720, 576, 720 * 4, &bytes);

        sink.on_frame_arrived(&lost);
        sink.on_frame_arrived(&lost);
        assert!(!session.poll());
        sink.on_frame_arrived(&good);
        assert!(session.poll());

        let stats = session.stats();
        assert_eq!(session.frame_count(), 3);
        assert_eq!(stats.signal_lost_frames, 2);
        assert_eq!(stats.frames_converted, 1);
    }

    #[test]
    fn conversion_failure_counts_as_drop() {
        let session = streaming_session();
        let sink = session.sink();
        let bytes = vec![0u8; 16];
        sink.on_frame_arrived(&RawFrame::new(2, 2, 8, &bytes));
        assert!(!session.poll());
        assert_eq!(session.frame_count(), 1);
        assert_eq!(session.stats().conversion_drops, 1);
    }

    #[test]
    fn timecode_does_not_affect_conversion() {
        let session = streaming_session();
        let sink = session.sink();
        let bytes = vec![0u8; 720 * 4 * 576];
        let frame = RawFrame::new(720, 576, 720 * 4, &bytes).with_timecode("10:00:00:01");
        sink.on_frame_arrived(&frame);
        assert!(session.poll());
    }
}
