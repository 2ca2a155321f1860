//! Frame sources feeding the compositor.

mod nokhwa_backend;
mod still;

pub use nokhwa_backend::NokhwaCapture;
pub use still::StillImageSource;

use crate::frame::VideoFrame;
use anyhow::Result;

/// Anything that yields decoded frames with known dimensions.
pub trait FrameSource {
    /// Returns the next frame, blocking until the source has one.
    fn next_frame(&mut self) -> Result<VideoFrame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<VideoFrame> {
        (**self).next_frame()
    }

    fn frame_size(&self) -> (u32, u32) {
        (**self).frame_size()
    }
}
