//! Error types for the compositor.

use thiserror::Error;

/// A failure while rendering a single frame.
///
/// These never leave `process_frame`: the frame is skipped and the caller
/// passes the raw feed through until the next tick.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to allocate {width}x{height} surface")]
    SurfaceAlloc { width: u32, height: u32 },

    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Surface is tainted by a cross-origin image, pixel read-back denied")]
    ReadbackDenied,

    #[error("Pixel format conversion failed: {0}")]
    Conversion(String),

    #[error("Draw error: {0}")]
    Draw(String),

    #[error("Processor has been disposed")]
    Disposed,
}

/// A failure while fetching or decoding a background image.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid image URL '{0}'")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    #[error("Unknown background preset '{0}'")]
    UnknownPreset(String),

    #[error("Processor has been disposed")]
    Disposed,

    #[error("Background load was abandoned before completing")]
    Cancelled,

    #[error("A newer background was installed first")]
    Superseded,
}

impl From<image::ImageError> for LoadError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => LoadError::Unsupported(e.to_string()),
            image::ImageError::IoError(e) => LoadError::Io(e),
            other => LoadError::Decode(other.to_string()),
        }
    }
}

/// A problem with effect configuration (YAML file or CLI values).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown background mode '{0}' (expected none, blur or image)")]
    UnknownMode(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}
