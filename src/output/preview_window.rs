//! On-screen preview window.

use super::RenderSink;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use minifb::{Key, Window, WindowOptions};
use std::borrow::Cow;
use tracing::{debug, info};

/// Shows frames in a native window. Closing it or pressing Escape ends the
/// stream.
pub struct PreviewWindow {
    window: Window,
    /// 0x00RRGGBB per pixel, as minifb expects
    buffer: Vec<u32>,
}

impl PreviewWindow {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let options = WindowOptions {
            resize: true,
            ..WindowOptions::default()
        };
        let window = Window::new(title, width.max(1) as usize, height.max(1) as usize, options)
            .map_err(|e| anyhow!("Failed to create preview window: {}", e))?;
        info!("Preview window opened ({}x{})", width, height);
        Ok(Self {
            window,
            buffer: Vec::new(),
        })
    }
}

/// Packs RGBA pixels into minifb's 0x00RRGGBB layout, dropping alpha.
pub(crate) fn pack_rgb(rgba: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        rgba.chunks_exact(4)
            .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32),
    );
}

impl RenderSink for PreviewWindow {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        let frame = match frame.format {
            PixelFormat::Rgba => Cow::Borrowed(frame),
            _ => Cow::Owned(frame.to_rgba()?),
        };
        pack_rgb(&frame.data, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, frame.width as usize, frame.height as usize)
            .map_err(|e| anyhow!("Failed to update preview window: {}", e))
    }

    fn is_open(&self) -> bool {
        let open = self.window.is_open() && !self.window.is_key_down(Key::Escape);
        if !open {
            debug!("Preview window closed");
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgb_drops_alpha() {
        let mut out = Vec::new();
        pack_rgb(&[0x12, 0x34, 0x56, 0x00, 0xff, 0x00, 0x80, 0xff], &mut out);
        assert_eq!(out, vec![0x0012_3456, 0x00ff_0080]);
    }
}
