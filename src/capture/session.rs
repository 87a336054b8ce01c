//! Capture session lifecycle: negotiation, streaming, teardown, and
//! renegotiation after a signal format change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::convert::{create_converter, ColorConverter};
use crate::device::api::{DeckLinkApi, InputCallback};
use crate::device::catalog::select_device;
use crate::device::error::{CaptureError, Result};
use crate::device::guard::Acquired;
use crate::device::modes::DisplayModeCatalog;
use crate::device::types::{DisplayMode, DisplayModeId, InputFlags, PixelFormat};
use crate::diagnostics::stats::{CaptureStats, StatsSnapshot};
use crate::settings::types::CaptureSettings;

use super::exchange::FrameExchange;
use super::sink::FrameCallbackSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Uninitialized,
    /// Mode and format accepted, video input enabled, not yet streaming.
    Negotiated,
    Streaming,
    Stopped,
    /// Open or renegotiation failed; see [`CaptureSession::failure`].
    Failed,
}

/// Everything held on the device while a session is open.
///
/// Fields drop in declaration order, so teardown runs last-acquired first.
struct Link<A: DeckLinkApi + ?Sized> {
    streams: Option<Acquired<A>>,
    _video_input: Acquired<A>,
    _callback: Acquired<A>,
    input: Acquired<A>,
    _device: Acquired<A>,
    device_index: usize,
    mode: DisplayMode,
    pixel_format: PixelFormat,
    flags: InputFlags,
}

/// State shared between the client and the driver callback.
pub(crate) struct SessionCore<A: DeckLinkApi + ?Sized + 'static> {
    api: Arc<A>,
    state: Mutex<SessionState>,
    failure: Mutex<Option<CaptureError>>,
    /// Lock order: `link` before `converter`.
    link: Mutex<Option<Link<A>>>,
    pub(crate) converter: Mutex<Box<dyn ColorConverter>>,
    pub(crate) exchange: FrameExchange,
    pub(crate) stats: CaptureStats,
}

impl<A: DeckLinkApi + ?Sized + 'static> SessionCore<A> {
    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Session state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn fail(&self, error: &CaptureError) {
        self.set_state(SessionState::Failed);
        *self.failure.lock() = Some(error.clone());
    }

    /// Acquire the device and bring it to streaming.
    fn negotiate(
        self: &Arc<Self>,
        device_index: usize,
        requested: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> Result<Link<A>> {
        let api = &self.api;
        let device = select_device(api, device_index)?;

        let input = api
            .query_input(device.handle())
            .map_err(CaptureError::InputInterfaceUnavailable)?;
        let input = Acquired::interface(api, input);

        let sink: Arc<dyn InputCallback> = Arc::new(FrameCallbackSink::new(Arc::downgrade(self)));
        api.set_callback(input.handle(), Some(sink))
            .map_err(CaptureError::InputInterfaceUnavailable)?;
        let callback = Acquired::callback(api, input.handle());

        let catalog = DisplayModeCatalog::new(api, input.handle());
        let mode = catalog.find(requested)?;
        debug!(
            "Found mode {} ({}x{} @ {:.2} fps)",
            mode.name,
            mode.width,
            mode.height,
            mode.fps()
        );

        if flags.contains(InputFlags::DUAL_STREAM_3D) && !mode.supports_3d() {
            return Err(CaptureError::StereoNotSupported(mode.id));
        }
        let supported = catalog
            .supports(&mode, pixel_format, flags)
            .map(|support| support.is_supported())
            .unwrap_or_else(|e| {
                warn!("Mode support query failed: {e}");
                false
            });
        if !supported {
            return Err(CaptureError::ModeNotSupported {
                mode: mode.id,
                pixel_format,
            });
        }

        let flags = flags | InputFlags::ENABLE_FORMAT_DETECTION;
        api.enable_video_input(input.handle(), mode.id, pixel_format, flags)
            .map_err(CaptureError::DeviceBusyOrUnsupported)?;
        let video_input = Acquired::video_input(api, input.handle());
        self.set_state(SessionState::Negotiated);

        self.converter
            .lock()
            .allocate(mode.width, mode.height, pixel_format)?;
        self.exchange.reset();
        self.stats.reset();

        api.start_streams(input.handle())
            .map_err(CaptureError::StreamStartFailed)?;
        let streams = Acquired::streams(api, input.handle());

        Ok(Link {
            streams: Some(streams),
            _video_input: video_input,
            _callback: callback,
            input,
            _device: device,
            device_index,
            mode,
            pixel_format,
            flags,
        })
    }

    /// Stop, re-enable input with `new_mode`, resize buffers, restart.
    ///
    /// Called from the driver thread. On failure the session is `Failed`
    /// and streams stay stopped.
    pub(crate) fn reconfigure(&self, new_mode: &DisplayMode) -> Result<()> {
        let mut slot = self.link.lock();
        let Some(link) = slot.as_mut() else {
            debug!("Format change after close; ignored");
            return Ok(());
        };

        link.streams = None;
        match self.restart(link, new_mode) {
            Ok(()) => {
                info!(
                    "Capture reconfigured to {} ({}x{})",
                    new_mode.name, new_mode.width, new_mode.height
                );
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn restart(&self, link: &mut Link<A>, new_mode: &DisplayMode) -> Result<()> {
        let input = link.input.handle();
        self.api
            .enable_video_input(input, new_mode.id, link.pixel_format, link.flags)
            .map_err(|e| {
                CaptureError::ReconfigureFailed(format!(
                    "could not enable input for {}: {e}",
                    new_mode.name
                ))
            })?;
        self.converter
            .lock()
            .allocate(new_mode.width, new_mode.height, link.pixel_format)
            .map_err(|e| {
                CaptureError::ReconfigureFailed(format!("could not resize buffers: {e}"))
            })?;
        // Buffers now match the new mode even if restarting fails below.
        link.mode = new_mode.clone();
        self.exchange.poll();
        self.api.start_streams(input).map_err(|e| {
            CaptureError::ReconfigureFailed(format!("could not restart streams: {e}"))
        })?;
        link.streams = Some(Acquired::streams(&self.api, input));
        Ok(())
    }
}

/// A capture session on one device.
///
/// The driver delivers frames on its own thread; the client calls
/// [`poll`](Self::poll) or [`update`](Self::update) and reads pixels from
/// its own. All methods take `&self`.
pub struct CaptureSession<A: DeckLinkApi + ?Sized + 'static> {
    core: Arc<SessionCore<A>>,
    frame_new: AtomicBool,
}

impl<A: DeckLinkApi + ?Sized + 'static> CaptureSession<A> {
    pub fn new(api: Arc<A>, converter: Box<dyn ColorConverter>) -> Self {
        Self {
            core: Arc::new(SessionCore {
                api,
                state: Mutex::new(SessionState::Uninitialized),
                failure: Mutex::new(None),
                link: Mutex::new(None),
                converter: Mutex::new(converter),
                exchange: FrameExchange::new(),
                stats: CaptureStats::new(),
            }),
            frame_new: AtomicBool::new(false),
        }
    }

    /// Build a session with the converter the settings ask for, honouring
    /// the `DECKGRAB_CONVERTER` override.
    pub fn with_settings(api: Arc<A>, settings: &CaptureSettings) -> Result<Self> {
        let converter = create_converter(settings.converter.with_env_override())?;
        Ok(Self::new(api, converter))
    }

    /// Open `device_index` in `mode` with `pixel_format` and start streaming.
    ///
    /// Format detection is always enabled in addition to `flags`. Any open
    /// device is closed first. On error everything acquired is released
    /// and the session is `Failed`.
    pub fn open(
        &self,
        device_index: usize,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> Result<()> {
        self.close();
        info!("Opening device {device_index} in mode {mode} ({pixel_format})");
        *self.core.failure.lock() = None;

        let mut slot = self.core.link.lock();
        match self.core.negotiate(device_index, mode, pixel_format, flags) {
            Ok(link) => {
                info!(
                    "Device {device_index} streaming {} ({}x{}) via {} converter",
                    link.mode.name,
                    link.mode.width,
                    link.mode.height,
                    self.core.converter.lock().name()
                );
                *slot = Some(link);
                self.core.set_state(SessionState::Streaming);
                Ok(())
            }
            Err(e) => {
                drop(slot);
                warn!("Could not open device {device_index}: {e}");
                self.close();
                self.core.fail(&e);
                Err(e)
            }
        }
    }

    /// Open using device, mode, pixel format and stereo flag from settings.
    pub fn open_with_settings(&self, settings: &CaptureSettings) -> Result<()> {
        self.open(
            settings.device_index,
            settings.display_mode,
            settings.pixel_format,
            settings.input_flags(),
        )
    }

    /// Stop streaming and release the device and conversion buffers.
    ///
    /// Idempotent. The device link is taken out of the session before the
    /// driver is told to stop, so a callback still running never waits on it.
    pub fn close(&self) {
        let link = self.core.link.lock().take();
        if let Some(link) = link {
            info!("Closing device {}", link.device_index);
            drop(link);
        }
        self.core.converter.lock().release();
        self.core.exchange.reset();
        self.frame_new.store(false, Ordering::Relaxed);

        let state = *self.core.state.lock();
        if matches!(state, SessionState::Streaming | SessionState::Negotiated) {
            self.core.set_state(SessionState::Stopped);
        }
    }

    pub fn state(&self) -> SessionState {
        *self.core.state.lock()
    }

    /// The error that put the session into `Failed`, if any.
    pub fn failure(&self) -> Option<CaptureError> {
        self.core.failure.lock().clone()
    }

    /// Frames delivered since open, including signal-loss frames.
    pub fn frame_count(&self) -> u64 {
        self.core.exchange.frame_count()
    }

    /// Whether a new frame was converted since the last poll. Clears the flag.
    pub fn poll(&self) -> bool {
        self.core.exchange.poll()
    }

    /// Latch [`poll`](Self::poll) for this client iteration.
    pub fn update(&self) {
        let fresh = self.core.exchange.poll();
        self.frame_new.store(fresh, Ordering::Relaxed);
    }

    /// Result of the last [`update`](Self::update).
    pub fn is_frame_new(&self) -> bool {
        self.frame_new.load(Ordering::Relaxed)
    }

    /// The negotiated mode, if open.
    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.core.link.lock().as_ref().map(|link| link.mode.clone())
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.core.link.lock().as_ref().map(|link| link.pixel_format)
    }

    pub fn device_index(&self) -> Option<usize> {
        self.core.link.lock().as_ref().map(|link| link.device_index)
    }

    /// Width of the converted image; 0 when closed.
    pub fn width(&self) -> u32 {
        self.display_mode().map_or(0, |mode| mode.width)
    }

    /// Height of the converted image; 0 when closed.
    pub fn height(&self) -> u32 {
        self.display_mode().map_or(0, |mode| mode.height)
    }

    /// Wait for pending conversions and copy out the RGBA image
    /// (width x height x 4 bytes).
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let mut pixels = Vec::new();
        self.read_pixels_into(&mut pixels)?;
        Ok(pixels)
    }

    /// Like [`read_pixels`](Self::read_pixels), reusing `out`'s allocation.
    pub fn read_pixels_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut converter = self.core.converter.lock();
        converter.finish()?;
        converter.read_rgba(out)?;
        Ok(())
    }

    /// Wait for pending conversions and return the RGBA texture, when the
    /// converter renders on the GPU.
    pub fn texture(&self) -> Result<Option<wgpu::Texture>> {
        let mut converter = self.core.converter.lock();
        converter.finish()?;
        Ok(converter.gpu_texture())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> FrameCallbackSink<A> {
        FrameCallbackSink::new(Arc::downgrade(&self.core))
    }
}

impl<A: DeckLinkApi + ?Sized + 'static> Drop for CaptureSession<A> {
    fn drop(&mut self) {
        self.close();
    }
}
