//! A still image replayed as a video feed.

use super::FrameSource;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Repeats one image at a fixed rate, for running without a camera.
pub struct StillImageSource {
    image: RgbaImage,
    interval: Duration,
    started: Instant,
    next_due: Instant,
}

impl StillImageSource {
    pub fn open(path: &Path, fps: u32) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| anyhow!("Failed to open still image {:?}: {}", path, e))?
            .to_rgba8();
        info!("Using still image {:?} ({}x{}) as input", path, image.width(), image.height());
        Ok(Self::from_image(image, fps))
    }

    pub fn from_image(image: RgbaImage, fps: u32) -> Self {
        let now = Instant::now();
        Self {
            image,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            started: now,
            next_due: now,
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<VideoFrame> {
        // Pace like a camera would
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + self.interval;

        let mut frame = VideoFrame::from_data(
            self.image.width(),
            self.image.height(),
            PixelFormat::Rgba,
            self.image.as_raw().clone(),
        );
        frame.timestamp_us = Some(self.started.elapsed().as_micros() as u64);
        Ok(frame)
    }

    fn frame_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_still_source_repeats_image() {
        let mut source = StillImageSource::from_image(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])), 1000);
        assert_eq!(source.frame_size(), (3, 2));
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(second.rgba_at(2, 1), Some([1, 2, 3, 255]));
        assert!(second.timestamp_us >= first.timestamp_us);
    }

    #[test]
    fn test_still_source_opens_files() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        RgbaImage::from_pixel(5, 4, Rgba([9, 9, 9, 255])).save(file.path()).unwrap();
        let source = StillImageSource::open(file.path(), 30).unwrap();
        assert_eq!(source.frame_size(), (5, 4));
        assert!(StillImageSource::open(Path::new("/no/such/image.png"), 30).is_err());
    }
}
