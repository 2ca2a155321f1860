//! Periodic PNG snapshots of the output stream.

use super::RenderSink;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes every `every`-th frame to `dir/frame_NNNNNN.png`.
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl SnapshotSink {
    pub fn new(dir: &Path, every: u64) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| anyhow!("Failed to create snapshot directory {:?}: {}", dir, e))?;
        info!("Writing snapshots to {:?} (every {} frames)", dir, every.max(1));
        Ok(Self {
            dir: dir.to_path_buf(),
            every: every.max(1),
            seen: 0,
            written: 0,
        })
    }

    /// Number of PNG files written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl RenderSink for SnapshotSink {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        let index = self.seen;
        self.seen += 1;
        if index % self.every != 0 {
            return Ok(());
        }

        let rgba = match frame.format {
            PixelFormat::Rgba => frame.data.clone(),
            _ => frame.to_rgba()?.data,
        };
        let image = RgbaImage::from_raw(frame.width, frame.height, rgba)
            .ok_or_else(|| anyhow!("Frame buffer does not match {}x{}", frame.width, frame.height))?;

        let path = self.dir.join(format!("frame_{index:06}.png"));
        image.save(&path).map_err(|e| anyhow!("Failed to write {:?}: {}", path, e))?;
        debug!("Wrote snapshot {:?}", path);
        self.written += 1;
        Ok(())
    }
}
