use serde::{Deserialize, Serialize};

use crate::convert::ConverterKind;
use crate::device::types::{DisplayModeId, InputFlags, PixelFormat};

/// What to capture and how to convert it.
///
/// Missing fields fall back to their defaults: device 0, NTSC, 8-bit YUV,
/// no stereo, automatic converter choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub device_index: usize,
    pub display_mode: DisplayModeId,
    pub pixel_format: PixelFormat,
    #[serde(rename = "dualStream3D")]
    pub dual_stream_3d: bool,
    pub converter: ConverterKind,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            display_mode: DisplayModeId::NTSC,
            pixel_format: PixelFormat::Yuv8,
            dual_stream_3d: false,
            converter: ConverterKind::Auto,
        }
    }
}

impl CaptureSettings {
    /// Input flags requested by these settings. Format detection is added
    /// by the session itself.
    pub fn input_flags(&self) -> InputFlags {
        if self.dual_stream_3d {
            InputFlags::DUAL_STREAM_3D
        } else {
            InputFlags::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_capture_ntsc_yuv8_from_first_device() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.device_index, 0);
        assert_eq!(settings.display_mode, DisplayModeId::NTSC);
        assert_eq!(settings.pixel_format, PixelFormat::Yuv8);
        assert_eq!(settings.input_flags(), InputFlags::empty());
    }

    #[test]
    fn serialises_to_json() {
        let settings = CaptureSettings {
            device_index: 2,
            display_mode: DisplayModeId::HD1080I5994,
            pixel_format: PixelFormat::Yuv10,
            dual_stream_3d: true,
            converter: ConverterKind::Gpu,
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["deviceIndex"], 2);
        assert_eq!(json["displayMode"], "Hi59");
        assert_eq!(json["pixelFormat"], "yuv10");
        assert_eq!(json["dualStream3D"], true);
        assert_eq!(json["converter"], "gpu");
    }

    #[test]
    fn deserialises_partial_json_with_defaults() {
        let settings: CaptureSettings =
            serde_json::from_str(r#"{"displayMode": "720p50", "dualStream3D": true}"#).unwrap();
        assert_eq!(settings.display_mode, DisplayModeId::HD720P50);
        assert_eq!(settings.pixel_format, PixelFormat::Yuv8);
        assert_eq!(settings.converter, ConverterKind::Auto);
        assert!(settings.input_flags().contains(InputFlags::DUAL_STREAM_3D));
    }

    #[test]
    fn rejects_unknown_display_mode() {
        let result = serde_json::from_str::<CaptureSettings>(r#"{"displayMode": "4320p120"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let original = CaptureSettings {
            display_mode: DisplayModeId::PAL,
            pixel_format: PixelFormat::Bgra8,
            ..CaptureSettings::default()
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: CaptureSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }
}
