//! Frame grabber for DeckLink-style capture cards.
//!
//! A [`CaptureSession`] negotiates a display mode and pixel format with one
//! device, receives frames on the driver's thread, converts each to RGBA
//! (on the GPU when available) and hands the latest one to a polling client.

pub mod capture;
pub mod convert;
pub mod device;
pub mod diagnostics;
pub mod settings;

pub use capture::exchange::FrameExchange;
pub use capture::session::{CaptureSession, SessionState};
pub use capture::sink::FrameCallbackSink;
pub use convert::error::ConversionError;
pub use convert::{create_converter, ColorConverter, ConverterKind};
pub use device::api::{DeckLinkApi, DriverError, InputCallback, InterfaceHandle};
pub use device::catalog::{DeviceCapabilities, DeviceCatalog, DeviceInfo};
pub use device::error::CaptureError;
pub use device::modes::DisplayModeCatalog;
pub use device::types::{DisplayMode, DisplayModeId, InputFlags, PixelFormat, RawFrame};
pub use diagnostics::stats::{CaptureStats, StatsSnapshot};
pub use settings::store::{SettingsError, SettingsStore};
pub use settings::types::CaptureSettings;
