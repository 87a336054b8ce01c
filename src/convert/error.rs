use thiserror::Error;

/// Colour conversion errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("kernel dispatch failed: {0}")]
    KernelDispatch(String),

    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("GPU device request failed: {0}")]
    DeviceRequest(String),

    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("frame is {actual_width}x{actual_height}, buffers are {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("row stride {row_bytes} is too small or misaligned for width {width}")]
    InvalidStride { row_bytes: u32, width: u32 },

    #[error("frame has {actual} bytes, expected at least {expected}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("read-back failed: {0}")]
    ReadBack(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, ConversionError>;
