//! `DeckLinkApi` trait: abstracts the capture-card driver for testability.
//!
//! A native binding and the `MockDeckLink` both implement this trait, so
//! `CaptureSession<A>` and `DeviceCatalog<A>` are generic over the driver.

use std::fmt;
use std::sync::Arc;

use super::types::{
    DetectedSignalFlags, DeviceAttributes, DisplayMode, DisplayModeId, FormatChangedEvents,
    InputFlags, ModeSupport, PixelFormat, RawFrame,
};

/// Opaque reference-counted driver object (iterator, device, input, output).
///
/// Every handle returned by the driver must be passed to
/// [`DeckLinkApi::release`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle(pub u64);

/// Status code returned by a failing driver call.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverError(pub i32);

impl DriverError {
    pub const FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const NO_INTERFACE: Self = Self(0x8000_4002_u32 as i32);
    pub const INVALID_ARG: Self = Self(0x8007_0057_u32 as i32);
    pub const ACCESS_DENIED: Self = Self(0x8007_0005_u32 as i32);
    pub const OUT_OF_MEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const NOT_IMPLEMENTED: Self = Self(0x8000_4001_u32 as i32);
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverError({self})")
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Receiver for driver notifications on an input interface.
///
/// Called on a thread owned by the driver. Implementations must not block
/// on the client thread.
pub trait InputCallback: Send + Sync {
    /// A frame arrived. `frame.bytes` is only valid until this returns.
    fn video_input_frame_arrived(&self, frame: &RawFrame<'_>);

    /// The driver detected a change in the incoming signal.
    fn video_input_format_changed(
        &self,
        events: FormatChangedEvents,
        mode: &DisplayMode,
        detected: DetectedSignalFlags,
    );
}

/// Abstraction over the capture-card driver.
///
/// All methods take `&self`; implementations manage their own interior
/// mutability.
pub trait DeckLinkApi: Send + Sync {
    /// Create a device iterator. Fails when the driver is not installed.
    fn create_iterator(&self) -> DriverResult<InterfaceHandle>;

    /// Advance a device iterator. `Ok(None)` once all devices were returned.
    fn next_device(&self, iterator: InterfaceHandle) -> DriverResult<Option<InterfaceHandle>>;

    fn model_name(&self, device: InterfaceHandle) -> DriverResult<String>;

    fn attributes(&self, device: InterfaceHandle) -> DriverResult<DeviceAttributes>;

    /// Query the device's input interface.
    fn query_input(&self, device: InterfaceHandle) -> DriverResult<InterfaceHandle>;

    /// Query the device's output interface.
    fn query_output(&self, device: InterfaceHandle) -> DriverResult<InterfaceHandle>;

    /// Create a display mode iterator for an input or output interface.
    fn display_mode_iterator(&self, io: InterfaceHandle) -> DriverResult<InterfaceHandle>;

    fn next_display_mode(&self, iterator: InterfaceHandle) -> DriverResult<Option<DisplayMode>>;

    /// Ask whether `io` can run `mode` with `pixel_format` and `flags`.
    fn supports_video_mode(
        &self,
        io: InterfaceHandle,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> DriverResult<ModeSupport>;

    /// Register (or with `None`, unregister) the input callback.
    fn set_callback(
        &self,
        input: InterfaceHandle,
        callback: Option<Arc<dyn InputCallback>>,
    ) -> DriverResult<()>;

    fn enable_video_input(
        &self,
        input: InterfaceHandle,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> DriverResult<()>;

    fn disable_video_input(&self, input: InterfaceHandle) -> DriverResult<()>;

    fn start_streams(&self, input: InterfaceHandle) -> DriverResult<()>;

    /// Stop streaming. Returns after in-flight callbacks have finished.
    fn stop_streams(&self, input: InterfaceHandle) -> DriverResult<()>;

    /// Drop one reference to a driver object.
    fn release(&self, handle: InterfaceHandle);
}
