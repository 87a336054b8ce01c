//! CPU colour converter.
//!
//! Used when no GPU adapter is available, and as the reference the GPU
//! kernel is tested against.

use tracing::debug;

use crate::device::types::PixelFormat;

use super::colour::{decode_pixel, Coefficients};
use super::error::{ConversionError, Result};
use super::{Allocation, ColorConverter};

#[derive(Default)]
pub struct CpuConverter {
    allocation: Option<Allocation>,
    rgba: Vec<u8>,
}

impl CpuConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The converted image, tightly packed.
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl ColorConverter for CpuConverter {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn allocate(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let allocation = Allocation::new(width, height, pixel_format)?;
        self.rgba.clear();
        self.rgba.resize(allocation.rgba_len(), 0);
        self.allocation = Some(allocation);
        debug!("CPU converter allocated {width}x{height} {pixel_format}");
        Ok(())
    }

    fn convert(&mut self, raw: &[u8], row_bytes: u32, width: u32, height: u32) -> Result<()> {
        let allocation = self
            .allocation
            .ok_or_else(|| ConversionError::KernelDispatch("buffers not allocated".into()))?;
        allocation.validate(raw, row_bytes, width, height)?;

        let k = Coefficients::for_height(height);
        let out_stride = width as usize * 4;
        for (y, out_row) in self.rgba.chunks_exact_mut(out_stride).enumerate() {
            let start = y * row_bytes as usize;
            let row = &raw[start..start + row_bytes as usize];
            for (x, pixel) in out_row.chunks_exact_mut(4).enumerate() {
                pixel.copy_from_slice(&decode_pixel(allocation.pixel_format, row, x, k));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_rgba(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.allocation.is_none() {
            return Err(ConversionError::ReadBack("buffers not allocated".into()));
        }
        out.clear();
        out.extend_from_slice(&self.rgba);
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.allocation.map(|a| (a.width, a.height))
    }

    fn release(&mut self) {
        self.allocation = None;
        self.rgba = Vec::new();
    }
}
