//! Pixel decoding and YCbCr to RGB math.
//!
//! `convert.wgsl` implements the same arithmetic; keep the two in step.

use crate::device::types::PixelFormat;

/// Luma weights of a YCbCr colour matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub kr: f32,
    pub kb: f32,
}

impl Coefficients {
    pub const BT601: Self = Self {
        kr: 0.299,
        kb: 0.114,
    };
    pub const BT709: Self = Self {
        kr: 0.2126,
        kb: 0.0722,
    };

    /// BT.601 for standard-definition heights, BT.709 above.
    pub fn for_height(height: u32) -> Self {
        if height <= 576 {
            Self::BT601
        } else {
            Self::BT709
        }
    }
}

/// Normalised studio-range samples to opaque 8-bit RGBA.
///
/// `y` is in 0..1, `cb`/`cr` in -0.5..0.5.
pub fn ycbcr_to_rgba(y: f32, cb: f32, cr: f32, k: Coefficients) -> [u8; 4] {
    let kg = 1.0 - k.kr - k.kb;
    let r = y + 2.0 * (1.0 - k.kr) * cr;
    let b = y + 2.0 * (1.0 - k.kb) * cb;
    let g = y - (2.0 * (1.0 - k.kb) * k.kb / kg) * cb - (2.0 * (1.0 - k.kr) * k.kr / kg) * cr;
    [unorm8(r), unorm8(g), unorm8(b), 255]
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn luma8(v: u32) -> f32 {
    (v as f32 - 16.0) / 219.0
}

fn chroma8(v: u32) -> f32 {
    (v as f32 - 128.0) / 224.0
}

fn luma10(v: u32) -> f32 {
    (v as f32 - 64.0) / 876.0
}

fn chroma10(v: u32) -> f32 {
    (v as f32 - 512.0) / 896.0
}

fn le_word(row: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([row[offset], row[offset + 1], row[offset + 2], row[offset + 3]])
}

fn be_word(row: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([row[offset], row[offset + 1], row[offset + 2], row[offset + 3]])
}

/// Sample `index` (0..12) of a 16-byte v210 block.
fn v210_sample(block: &[u8], index: usize) -> u32 {
    (le_word(block, (index / 3) * 4) >> ((index % 3) * 10)) & 0x3ff
}

/// Decode pixel `x` of one row. The row must hold at least
/// `pixel_format.min_row_bytes(x + 1)` bytes.
pub fn decode_pixel(pixel_format: PixelFormat, row: &[u8], x: usize, k: Coefficients) -> [u8; 4] {
    match pixel_format {
        PixelFormat::Yuv8 => {
            let pair = (x / 2) * 4;
            let cb = row[pair] as u32;
            let y = row[pair + 1 + (x % 2) * 2] as u32;
            let cr = row[pair + 2] as u32;
            ycbcr_to_rgba(luma8(y), chroma8(cb), chroma8(cr), k)
        }
        PixelFormat::Yuv10 => {
            let block = &row[(x / 6) * 16..];
            let q = x % 6;
            let y = v210_sample(block, 2 * q + 1);
            let cb = v210_sample(block, 4 * (q / 2));
            let cr = v210_sample(block, 4 * (q / 2) + 2);
            ycbcr_to_rgba(luma10(y), chroma10(cb), chroma10(cr), k)
        }
        PixelFormat::Argb8 => {
            let p = &row[x * 4..x * 4 + 4];
            [p[1], p[2], p[3], 255]
        }
        PixelFormat::Bgra8 => {
            let p = &row[x * 4..x * 4 + 4];
            [p[2], p[1], p[0], 255]
        }
        PixelFormat::Rgb10 => {
            let word = be_word(row, x * 4);
            let level = |shift: u32| unorm8(luma10((word >> shift) & 0x3ff));
            [level(20), level(10), level(0), 255]
        }
    }
}
