use thiserror::Error;

use crate::convert::error::ConversionError;

use super::api::DriverError;
use super::types::{DisplayModeId, PixelFormat};

/// Capture subsystem errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("capture driver unavailable ({0}); is it installed?")]
    DriverUnavailable(DriverError),

    #[error("no capture device at index {0}")]
    DeviceNotFound(usize),

    #[error("device has no input interface ({0})")]
    InputInterfaceUnavailable(DriverError),

    #[error("display mode iterator unavailable ({0})")]
    DisplayModeIteratorUnavailable(DriverError),

    #[error("requested display mode {0} is not offered by the device")]
    InvalidModeRequested(DisplayModeId),

    #[error("display mode {mode} does not support {pixel_format}")]
    ModeNotSupported {
        mode: DisplayModeId,
        pixel_format: PixelFormat,
    },

    #[error("display mode {0} does not support dual-stream 3D")]
    StereoNotSupported(DisplayModeId),

    #[error("could not enable video input; device busy or mode unsupported ({0})")]
    DeviceBusyOrUnsupported(DriverError),

    #[error("could not start streams ({0})")]
    StreamStartFailed(DriverError),

    #[error("colour conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("reconfiguration after format change failed: {0}")]
    ReconfigureFailed(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
