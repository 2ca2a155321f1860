//! Render sinks for processed (or passed-through) frames.

mod preview_window;
mod snapshots;
#[cfg(target_os = "linux")]
mod virtual_camera_linux;

pub use preview_window::PreviewWindow;
pub use snapshots::SnapshotSink;
#[cfg(target_os = "linux")]
pub use virtual_camera_linux::{VirtualCameraConfig, VirtualCameraOutput};

use crate::frame::VideoFrame;
use anyhow::Result;

/// Accepts one frame per tick and exposes it onward.
pub trait RenderSink {
    /// Write a frame to the output.
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// False once the sink can no longer take frames, e.g. its window closed.
    fn is_open(&self) -> bool {
        true
    }
}

impl<T: RenderSink + ?Sized> RenderSink for Box<T> {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
