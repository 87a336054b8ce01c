use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a `u32` flag set with named bits, `contains` and `|`.
macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$bit_meta:meta])* $bit:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$bit_meta])* pub const $bit: Self = Self($value);)*

            /// The empty set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Whether every bit of `other` is set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Capabilities advertised by a display mode.
    DisplayModeFlags {
        /// The mode can carry dual-stream stereoscopic video.
        SUPPORTS_3D = 1 << 0,
        COLORSPACE_REC601 = 1 << 1,
        COLORSPACE_REC709 = 1 << 2,
    }
}

flag_set! {
    /// Flags passed when enabling video input.
    InputFlags {
        /// Ask the driver to report signal format changes.
        ENABLE_FORMAT_DETECTION = 1 << 0,
        /// Capture both eyes of a stereoscopic signal.
        DUAL_STREAM_3D = 1 << 1,
    }
}

flag_set! {
    /// Per-frame flags set by the driver.
    FrameFlags {
        /// The frame was generated while no input signal was present.
        HAS_NO_INPUT_SOURCE = 1 << 0,
    }
}

flag_set! {
    /// What changed in a format-change notification.
    FormatChangedEvents {
        DISPLAY_MODE_CHANGED = 1 << 0,
        FIELD_DOMINANCE_CHANGED = 1 << 1,
        COLORSPACE_CHANGED = 1 << 2,
    }
}

flag_set! {
    /// Properties of the signal the driver detected.
    DetectedSignalFlags {
        YCBCR_422 = 1 << 0,
        RGB_444 = 1 << 1,
        DUAL_STREAM_3D = 1 << 2,
    }
}

flag_set! {
    /// Physical video connectors on a card.
    VideoConnections {
        SDI = 1 << 0,
        HDMI = 1 << 1,
        OPTICAL_SDI = 1 << 2,
        COMPONENT = 1 << 3,
        COMPOSITE = 1 << 4,
        SVIDEO = 1 << 5,
    }
}

impl VideoConnections {
    const NAMES: [(Self, &'static str); 6] = [
        (Self::SDI, "SDI"),
        (Self::HDMI, "HDMI"),
        (Self::OPTICAL_SDI, "Optical SDI"),
        (Self::COMPONENT, "Component"),
        (Self::COMPOSITE, "Composite"),
        (Self::SVIDEO, "S-Video"),
    ];

    /// Names of the connectors present, in the driver's canonical order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for VideoConnections {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Four-character code identifying a display mode (e.g. `Hi59`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayModeId(pub u32);

impl DisplayModeId {
    pub const NTSC: Self = Self::from_fourcc(b"ntsc");
    pub const PAL: Self = Self::from_fourcc(b"pal ");
    pub const HD1080I5994: Self = Self::from_fourcc(b"Hi59");
    pub const HD1080I50: Self = Self::from_fourcc(b"Hi50");
    pub const HD1080P2997: Self = Self::from_fourcc(b"Hp29");
    pub const HD1080P30: Self = Self::from_fourcc(b"Hp30");
    pub const HD1080P25: Self = Self::from_fourcc(b"Hp25");
    pub const HD720P5994: Self = Self::from_fourcc(b"hp59");
    pub const HD720P60: Self = Self::from_fourcc(b"hp60");
    pub const HD720P50: Self = Self::from_fourcc(b"hp50");

    /// Build an ID from its four-character code.
    pub const fn from_fourcc(code: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*code))
    }

    /// The four-character code as bytes.
    pub fn fourcc(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for DisplayModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.fourcc() {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DisplayModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayModeId('{self}')")
    }
}

/// Accepts either a four-character code (`"Hi59"`) or the name of a
/// standard mode (`"1080i59.94"`, case-insensitive).
impl FromStr for DisplayModeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(mode) = STANDARD_MODES
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(s))
        {
            return Ok(mode.id);
        }
        match <[u8; 4]>::try_from(s.as_bytes()) {
            Ok(code) => Ok(Self::from_fourcc(&code)),
            Err(_) => Err(format!("unknown display mode: {s:?}")),
        }
    }
}

impl TryFrom<String> for DisplayModeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DisplayModeId> for String {
    fn from(id: DisplayModeId) -> Self {
        id.to_string()
    }
}

/// A resolution / frame-rate / scan combination a device can run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMode {
    pub id: DisplayModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frame duration in `time_scale` units.
    pub frame_duration: i64,
    pub time_scale: i64,
    #[serde(skip)]
    pub flags: DisplayModeFlags,
}

struct StandardMode {
    id: DisplayModeId,
    name: &'static str,
    width: u32,
    height: u32,
    frame_duration: i64,
    time_scale: i64,
    flags: DisplayModeFlags,
}

const SD: DisplayModeFlags = DisplayModeFlags::COLORSPACE_REC601;
const HD: DisplayModeFlags = DisplayModeFlags(
    DisplayModeFlags::COLORSPACE_REC709.0 | DisplayModeFlags::SUPPORTS_3D.0,
);

const STANDARD_MODES: &[StandardMode] = &[
    StandardMode {
        id: DisplayModeId::NTSC,
        name: "NTSC",
        width: 720,
        height: 486,
        frame_duration: 1001,
        time_scale: 30000,
        flags: SD,
    },
    StandardMode {
        id: DisplayModeId::PAL,
        name: "PAL",
        width: 720,
        height: 576,
        frame_duration: 1000,
        time_scale: 25000,
        flags: SD,
    },
    StandardMode {
        id: DisplayModeId::HD1080I5994,
        name: "1080i59.94",
        width: 1920,
        height: 1080,
        frame_duration: 1001,
        time_scale: 30000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD1080I50,
        name: "1080i50",
        width: 1920,
        height: 1080,
        frame_duration: 1000,
        time_scale: 25000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD1080P2997,
        name: "1080p29.97",
        width: 1920,
        height: 1080,
        frame_duration: 1001,
        time_scale: 30000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD1080P30,
        name: "1080p30",
        width: 1920,
        height: 1080,
        frame_duration: 1000,
        time_scale: 30000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD1080P25,
        name: "1080p25",
        width: 1920,
        height: 1080,
        frame_duration: 1000,
        time_scale: 25000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD720P5994,
        name: "720p59.94",
        width: 1280,
        height: 720,
        frame_duration: 1001,
        time_scale: 60000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD720P60,
        name: "720p60",
        width: 1280,
        height: 720,
        frame_duration: 1000,
        time_scale: 60000,
        flags: HD,
    },
    StandardMode {
        id: DisplayModeId::HD720P50,
        name: "720p50",
        width: 1280,
        height: 720,
        frame_duration: 1000,
        time_scale: 50000,
        flags: HD,
    },
];

impl DisplayMode {
    /// Look up one of the standard broadcast modes by ID.
    pub fn standard(id: DisplayModeId) -> Option<Self> {
        STANDARD_MODES.iter().find(|m| m.id == id).map(|m| Self {
            id: m.id,
            name: m.name.to_string(),
            width: m.width,
            height: m.height,
            frame_duration: m.frame_duration,
            time_scale: m.time_scale,
            flags: m.flags,
        })
    }

    /// All standard modes, in table order.
    pub fn standard_modes() -> Vec<Self> {
        STANDARD_MODES
            .iter()
            .filter_map(|m| Self::standard(m.id))
            .collect()
    }

    /// Frames per second.
    pub fn fps(&self) -> f64 {
        if self.frame_duration == 0 {
            return 0.0;
        }
        self.time_scale as f64 / self.frame_duration as f64
    }

    pub fn supports_3d(&self) -> bool {
        self.flags.contains(DisplayModeFlags::SUPPORTS_3D)
    }

    /// Copy of this mode with different flags.
    pub fn with_flags(mut self, flags: DisplayModeFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Raw encoding of the frames a device delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit 4:2:2 YCbCr, `2vuy` byte order (Cb Y0 Cr Y1).
    Yuv8,
    /// 10-bit 4:2:2 YCbCr, `v210` packing (6 pixels per 16 bytes).
    Yuv10,
    /// 8-bit ARGB, one byte per channel.
    Argb8,
    /// 8-bit BGRA, one byte per channel.
    Bgra8,
    /// 10-bit RGB, `r210` big-endian 2:10:10:10 words.
    Rgb10,
}

impl PixelFormat {
    pub const ALL: [Self; 5] = [
        Self::Yuv8,
        Self::Yuv10,
        Self::Argb8,
        Self::Bgra8,
        Self::Rgb10,
    ];

    /// Driver four-character code.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Yuv8 => *b"2vuy",
            Self::Yuv10 => *b"v210",
            Self::Argb8 => [0, 0, 0, 32],
            Self::Bgra8 => *b"BGRA",
            Self::Rgb10 => *b"r210",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Yuv8 => "8-bit YUV",
            Self::Yuv10 => "10-bit YUV",
            Self::Argb8 => "8-bit ARGB",
            Self::Bgra8 => "8-bit BGRA",
            Self::Rgb10 => "10-bit RGB",
        }
    }

    /// Whether samples are YCbCr (and need a colour matrix).
    pub fn is_ycbcr(self) -> bool {
        matches!(self, Self::Yuv8 | Self::Yuv10)
    }

    /// Row stride the driver uses for a frame of `width` pixels.
    pub fn row_bytes(self, width: u32) -> u32 {
        match self {
            Self::Yuv8 => width.div_ceil(2) * 4,
            Self::Yuv10 => width.div_ceil(48) * 128,
            Self::Argb8 | Self::Bgra8 => width * 4,
            Self::Rgb10 => width.div_ceil(64) * 256,
        }
    }

    /// Smallest row stride that still holds `width` pixels.
    pub fn min_row_bytes(self, width: u32) -> u32 {
        match self {
            Self::Yuv8 => width.div_ceil(2) * 4,
            Self::Yuv10 => width.div_ceil(6) * 16,
            Self::Argb8 | Self::Bgra8 | Self::Rgb10 => width * 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Answer to "can this interface run mode M with format F?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSupport {
    NotSupported,
    Supported,
    /// Supported, but the driver converts internally.
    SupportedWithConversion,
}

impl ModeSupport {
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::NotSupported)
    }
}

/// A frame as handed to the callback by the driver.
///
/// `bytes` is only valid for the duration of the callback; anything needed
/// afterwards must be copied or consumed before returning.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub bytes: &'a [u8],
    pub flags: FrameFlags,
    pub timecode: Option<&'a str>,
}

impl<'a> RawFrame<'a> {
    pub fn new(width: u32, height: u32, row_bytes: u32, bytes: &'a [u8]) -> Self {
        Self {
            width,
            height,
            row_bytes,
            bytes,
            flags: FrameFlags::empty(),
            timecode: None,
        }
    }

    /// A frame the driver generated while no signal was present.
    pub fn no_signal(width: u32, height: u32, row_bytes: u32, bytes: &'a [u8]) -> Self {
        Self {
            flags: FrameFlags::HAS_NO_INPUT_SOURCE,
            ..Self::new(width, height, row_bytes, bytes)
        }
    }

    pub fn with_timecode(mut self, timecode: &'a str) -> Self {
        self.timecode = Some(timecode);
        self
    }

    pub fn has_input_signal(&self) -> bool {
        !self.flags.contains(FrameFlags::HAS_NO_INPUT_SOURCE)
    }

    /// Size of the frame payload as reported by the driver.
    pub fn payload_len(&self) -> usize {
        self.row_bytes as usize * self.height as usize
    }
}

/// Static attributes of a capture card.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    /// Present only when the card has a serial port.
    pub serial_port_name: Option<String>,
    pub sub_device_count: i64,
    pub sub_device_index: i64,
    pub max_audio_channels: i64,
    pub supports_input_format_detection: bool,
    pub supports_internal_keying: bool,
    pub supports_external_keying: bool,
    pub supports_hd_keying: bool,
    pub input_connections: VideoConnections,
    pub output_connections: VideoConnections,
}
