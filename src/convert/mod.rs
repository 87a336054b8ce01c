// Colour conversion: raw capture formats to RGBA, on the GPU or the CPU.

pub mod colour;
pub mod cpu;
pub mod error;
pub mod gpu;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device::types::PixelFormat;

use self::cpu::CpuConverter;
use self::error::{ConversionError, Result};
use self::gpu::GpuConverter;

/// Environment variable that overrides the configured converter.
pub const CONVERTER_ENV: &str = "DECKGRAB_CONVERTER";

/// Converts raw frames into an RGBA image of fixed size.
///
/// The producer calls [`convert`](Self::convert) once per frame; the
/// consumer calls [`read_rgba`](Self::read_rgba) or
/// [`gpu_texture`](Self::gpu_texture). Callers serialise access.
pub trait ColorConverter: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// (Re)allocate buffers for frames of `width`x`height` in `pixel_format`.
    fn allocate(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()>;

    /// Convert one frame into the destination image.
    ///
    /// Submission is synchronous; use [`finish`](Self::finish) to wait for
    /// completion.
    fn convert(&mut self, raw: &[u8], row_bytes: u32, width: u32, height: u32) -> Result<()>;

    /// Block until all submitted conversions have completed.
    fn finish(&mut self) -> Result<()>;

    /// Copy the destination image into `out` as tightly packed RGBA.
    fn read_rgba(&mut self, out: &mut Vec<u8>) -> Result<()>;

    /// Allocated size, if any.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Free all frame buffers. Safe to call when nothing is allocated.
    fn release(&mut self);

    /// The destination texture, for converters that render on the GPU.
    fn gpu_texture(&self) -> Option<wgpu::Texture> {
        None
    }
}

/// Size and format the conversion buffers were allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Allocation {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ConversionError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            pixel_format,
        })
    }

    /// Bytes in the RGBA destination image.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Bytes of raw source data for a frame at the driver's stride.
    pub fn source_len(&self) -> usize {
        self.pixel_format.row_bytes(self.width) as usize * self.height as usize
    }

    /// Check that a frame fits these buffers. Returns the number of bytes of
    /// `raw` the conversion reads.
    pub fn validate(&self, raw: &[u8], row_bytes: u32, width: u32, height: u32) -> Result<usize> {
        if (width, height) != (self.width, self.height) {
            return Err(ConversionError::DimensionMismatch {
                width: self.width,
                height: self.height,
                actual_width: width,
                actual_height: height,
            });
        }
        let word_aligned = matches!(self.pixel_format, PixelFormat::Yuv10 | PixelFormat::Rgb10);
        let too_narrow = row_bytes < self.pixel_format.min_row_bytes(width);
        let misaligned = word_aligned && row_bytes % 4 != 0;
        if too_narrow || misaligned {
            return Err(ConversionError::InvalidStride { row_bytes, width });
        }
        let expected = row_bytes as usize * height as usize;
        if raw.len() < expected {
            return Err(ConversionError::ShortFrame {
                expected,
                actual: raw.len(),
            });
        }
        Ok(expected)
    }
}

/// Which converter a session should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    /// GPU when an adapter is available, otherwise CPU.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl ConverterKind {
    /// Parse a converter name (`auto`, `gpu`, `cpu`), case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "gpu" => Some(Self::Gpu),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }

    /// Apply the `DECKGRAB_CONVERTER` override, if set and valid.
    pub fn with_env_override(self) -> Self {
        match std::env::var(CONVERTER_ENV) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                warn!("Ignoring {CONVERTER_ENV}={value:?}; expected auto, gpu or cpu");
                self
            }),
            Err(_) => self,
        }
    }
}

/// Build a converter of the requested kind.
///
/// `Auto` falls back to the CPU converter when no GPU is usable; an
/// explicit `Gpu` request fails instead.
pub fn create_converter(kind: ConverterKind) -> Result<Box<dyn ColorConverter>> {
    match kind {
        ConverterKind::Cpu => Ok(Box::new(CpuConverter::new())),
        ConverterKind::Gpu => Ok(Box::new(GpuConverter::new()?)),
        ConverterKind::Auto => match GpuConverter::new() {
            Ok(gpu) => {
                info!("Using GPU colour conversion");
                Ok(Box::new(gpu))
            }
            Err(e) => {
                warn!("GPU colour conversion unavailable ({e}); falling back to CPU");
                Ok(Box::new(CpuConverter::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_rejects_empty_dimensions() {
        assert_eq!(
            Allocation::new(0, 1080, PixelFormat::Yuv8),
            Err(ConversionError::InvalidDimensions {
                width: 0,
                height: 1080
            })
        );
    }

    #[test]
    fn validate_accepts_driver_stride() {
        let alloc = Allocation::new(1920, 2, PixelFormat::Yuv10).unwrap();
        let raw = vec![0u8; 5120 * 2];
        assert_eq!(alloc.validate(&raw, 5120, 1920, 2), Ok(10240));
    }

    #[test]
    fn validate_reports_dimension_mismatch() {
        let alloc = Allocation::new(720, 486, PixelFormat::Yuv8).unwrap();
        let err = alloc.validate(&[], 1440, 720, 576).unwrap_err();
        assert!(matches!(err, ConversionError::DimensionMismatch { actual_height: 576, .. }));
    }

    #[test]
    fn validate_reports_small_or_misaligned_stride() {
        let alloc = Allocation::new(8, 1, PixelFormat::Bgra8).unwrap();
        assert!(matches!(
            alloc.validate(&[0; 64], 16, 8, 1),
            Err(ConversionError::InvalidStride { row_bytes: 16, .. })
        ));
        let alloc = Allocation::new(6, 1, PixelFormat::Yuv10).unwrap();
        assert!(matches!(
            alloc.validate(&[0; 64], 18, 6, 1),
            Err(ConversionError::InvalidStride { .. })
        ));
    }

    #[test]
    fn validate_accepts_odd_width_yuv8_at_driver_stride() {
        let alloc = Allocation::new(7, 2, PixelFormat::Yuv8).unwrap();
        let row_bytes = PixelFormat::Yuv8.row_bytes(7);
        let raw = vec![0u8; alloc.source_len()];
        assert_eq!(alloc.validate(&raw, row_bytes, 7, 2), Ok(32));
    }

    #[test]
    fn validate_reports_short_frame() {
        let alloc = Allocation::new(4, 2, PixelFormat::Yuv8).unwrap();
        assert_eq!(
            alloc.validate(&[0; 12], 8, 4, 2),
            Err(ConversionError::ShortFrame {
                expected: 16,
                actual: 12
            })
        );
    }

    #[test]
    fn converter_kind_parses_names() {
        assert_eq!(ConverterKind::parse("GPU"), Some(ConverterKind::Gpu));
        assert_eq!(ConverterKind::parse(" cpu "), Some(ConverterKind::Cpu));
        assert_eq!(ConverterKind::parse("metal"), None);
        assert_eq!(
            serde_json::to_string(&ConverterKind::Auto).unwrap(),
            "\"auto\""
        );
    }

    #[test]
    fn cpu_kind_always_builds() {
        let converter = create_converter(ConverterKind::Cpu).unwrap();
        assert_eq!(converter.name(), "cpu");
        assert!(converter.gpu_texture().is_none());
    }

    #[test]
    fn auto_kind_always_builds() {
        assert!(create_converter(ConverterKind::Auto).is_ok());
    }
}
