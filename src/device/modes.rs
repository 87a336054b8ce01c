//! Display mode enumeration for one input or output interface.

use std::sync::Arc;

use tracing::trace;

use super::api::{DeckLinkApi, DriverResult, InterfaceHandle};
use super::error::{CaptureError, Result};
use super::guard::Acquired;
use super::types::{DisplayMode, DisplayModeId, InputFlags, ModeSupport, PixelFormat};

/// Modes advertised by an interface. Borrows the interface; does not own it.
pub struct DisplayModeCatalog<'a, A: DeckLinkApi + ?Sized> {
    api: &'a Arc<A>,
    io: InterfaceHandle,
}

impl<'a, A: DeckLinkApi + ?Sized> DisplayModeCatalog<'a, A> {
    pub fn new(api: &'a Arc<A>, io: InterfaceHandle) -> Self {
        Self { api, io }
    }

    /// Walk the mode iterator, stopping early when `visit` returns `true`.
    fn walk(&self, mut visit: impl FnMut(DisplayMode) -> bool) -> Result<()> {
        let iterator = self
            .api
            .display_mode_iterator(self.io)
            .map_err(CaptureError::DisplayModeIteratorUnavailable)?;
        let iterator = Acquired::interface(self.api, iterator);
        while let Some(mode) = self
            .api
            .next_display_mode(iterator.handle())
            .map_err(CaptureError::DisplayModeIteratorUnavailable)?
        {
            trace!("Mode {} ({}x{})", mode.name, mode.width, mode.height);
            if visit(mode) {
                break;
            }
        }
        Ok(())
    }

    /// Every mode, in driver order.
    pub fn modes(&self) -> Result<Vec<DisplayMode>> {
        let mut modes = Vec::new();
        self.walk(|mode| {
            modes.push(mode);
            false
        })?;
        Ok(modes)
    }

    /// The mode with `id`, or `InvalidModeRequested`.
    pub fn find(&self, id: DisplayModeId) -> Result<DisplayMode> {
        let mut found = None;
        self.walk(|mode| {
            if mode.id == id {
                found = Some(mode);
                true
            } else {
                false
            }
        })?;
        found.ok_or(CaptureError::InvalidModeRequested(id))
    }

    /// Whether the interface can run `mode` with `pixel_format` and `flags`.
    pub fn supports(
        &self,
        mode: &DisplayMode,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> DriverResult<ModeSupport> {
        self.api
            .supports_video_mode(self.io, mode.id, pixel_format, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::api::DriverError;
    use crate::device::mock::{MockDeckLink, MockDevice};

    fn input_of(api: &Arc<MockDeckLink>) -> (InterfaceHandle, InterfaceHandle, InterfaceHandle) {
        let iterator = api.create_iterator().unwrap();
        let device = api.next_device(iterator).unwrap().unwrap();
        let input = api.query_input(device).unwrap();
        (iterator, device, input)
    }

    #[test]
    fn lists_all_modes_without_leaking_the_iterator() {
        let api = Arc::new(MockDeckLink::new().with_devices(1));
        let (_, _, input) = input_of(&api);
        let before = api.outstanding_references();
        let modes = DisplayModeCatalog::new(&api, input).modes().unwrap();
        assert_eq!(modes.len(), DisplayMode::standard_modes().len());
        assert_eq!(api.outstanding_references(), before);
    }

    #[test]
    fn find_returns_the_requested_mode() {
        let api = Arc::new(MockDeckLink::new().with_devices(1));
        let (_, _, input) = input_of(&api);
        let mode = DisplayModeCatalog::new(&api, input)
            .find(DisplayModeId::HD720P50)
            .unwrap();
        assert_eq!((mode.width, mode.height), (1280, 720));
    }

    #[test]
    fn find_reports_missing_mode() {
        let api = Arc::new(MockDeckLink::new().with_device(
            MockDevice::new("SD only").with_modes(vec![
                DisplayMode::standard(DisplayModeId::NTSC).unwrap(),
            ]),
        ));
        let (_, _, input) = input_of(&api);
        let before = api.outstanding_references();
        let err = DisplayModeCatalog::new(&api, input)
            .find(DisplayModeId::HD1080I5994)
            .unwrap_err();
        assert_eq!(err, CaptureError::InvalidModeRequested(DisplayModeId::HD1080I5994));
        assert_eq!(api.outstanding_references(), before);
    }

    #[test]
    fn iterator_failure_is_reported() {
        let api = Arc::new(
            MockDeckLink::new()
                .with_devices(1)
                .with_error("display_mode_iterator", DriverError::OUT_OF_MEMORY),
        );
        let (_, _, input) = input_of(&api);
        let err = DisplayModeCatalog::new(&api, input).modes().unwrap_err();
        assert_eq!(
            err,
            CaptureError::DisplayModeIteratorUnavailable(DriverError::OUT_OF_MEMORY)
        );
    }

    #[test]
    fn supports_delegates_to_driver() {
        let api = Arc::new(MockDeckLink::new().with_device(
            MockDevice::new("Mini")
                .with_pixel_formats(DisplayModeId::PAL, &[PixelFormat::Yuv10]),
        ));
        let (_, _, input) = input_of(&api);
        let catalog = DisplayModeCatalog::new(&api, input);
        let pal = catalog.find(DisplayModeId::PAL).unwrap();
        assert_eq!(
            catalog.supports(&pal, PixelFormat::Yuv8, InputFlags::empty()),
            Ok(ModeSupport::NotSupported)
        );
        assert_eq!(
            catalog.supports(&pal, PixelFormat::Yuv10, InputFlags::empty()),
            Ok(ModeSupport::Supported)
        );
    }
}
