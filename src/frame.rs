//! Video frame types and pixel format conversions.

use anyhow::{anyhow, Result};

/// Supported pixel formats for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel), straight alpha
    Rgba,
    /// YUV 4:2:2 packed format (Y0 U0 Y1 V0)
    Yuyv,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel for packed formats.
    /// For NV12 this returns the bytes for the Y component only.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Yuyv => 2,
            PixelFormat::Nv12 => 1,
        }
    }

    /// Total buffer size for a frame of the given dimensions.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Nv12 => w * h + (w + w % 2) * h.div_ceil(2),
            _ => w * h * self.bytes_per_pixel(),
        }
    }
}

/// One decoded frame of a video feed.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Timestamp in microseconds (if available)
    pub timestamp_us: Option<u64>,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a zeroed frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data: vec![0; format.frame_size(width, height)],
        }
    }

    /// Creates a video frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// Creates an RGBA frame with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(PixelFormat::Rgba.frame_size(width, height))
            .collect();
        Self::from_data(width, height, PixelFormat::Rgba, data)
    }

    /// A frame is ready once the source has decoded real dimensions.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Whether `data` holds exactly one frame of `format` at these dimensions.
    pub fn has_valid_size(&self) -> bool {
        self.data.len() == self.format.frame_size(self.width, self.height)
    }

    /// Reads one RGBA pixel. Only meaningful for RGBA frames.
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format != PixelFormat::Rgba || x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> Result<VideoFrame> {
        self.check_size()?;
        let pixel_count = self.width as usize * self.height as usize;
        let data = match self.format {
            PixelFormat::Rgba => return Ok(self.clone()),
            PixelFormat::Rgb => {
                // No color conversion needed, just add alpha=255
                let mut rgba = Vec::with_capacity(pixel_count * 4);
                for px in self.data.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                rgba
            }
            PixelFormat::Yuyv | PixelFormat::Nv12 => {
                let mut rgba = vec![0u8; pixel_count * 4];
                self.convert_with_ezk(&mut rgba, PixelFormat::Rgba)?;
                rgba
            }
        };
        Ok(self.derive(PixelFormat::Rgba, data))
    }

    /// Converts this frame to YUYV, the format v4l2loopback consumers expect.
    pub fn to_yuyv(&self) -> Result<VideoFrame> {
        if self.format == PixelFormat::Yuyv {
            return Ok(self.clone());
        }
        self.check_size()?;
        let mut yuyv = vec![0u8; PixelFormat::Yuyv.frame_size(self.width, self.height)];
        self.convert_with_ezk(&mut yuyv, PixelFormat::Yuyv)?;
        Ok(self.derive(PixelFormat::Yuyv, yuyv))
    }

    fn derive(&self, format: PixelFormat, data: Vec<u8>) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            format,
            timestamp_us: self.timestamp_us,
            data,
        }
    }

    fn check_size(&self) -> Result<()> {
        if self.has_valid_size() {
            Ok(())
        } else {
            Err(anyhow!(
                "{:?} frame {}x{} has {} bytes, expected {}",
                self.format,
                self.width,
                self.height,
                self.data.len(),
                self.format.frame_size(self.width, self.height)
            ))
        }
    }

    fn convert_with_ezk(&self, dst: &mut [u8], dst_format: PixelFormat) -> Result<()> {
        let width = self.width as usize;
        let height = self.height as usize;

        let mut dst_image = ezk_image::Image::from_buffer(
            ezk_format(dst_format),
            dst,
            None,
            width,
            height,
            ezk_color(dst_format),
        )
        .map_err(|e| anyhow!("Failed to wrap {:?} destination buffer: {:?}", dst_format, e))?;

        let src_image = ezk_image::Image::from_buffer(
            ezk_format(self.format),
            &self.data[..],
            None,
            width,
            height,
            ezk_color(self.format),
        )
        .map_err(|e| anyhow!("Failed to wrap {:?} source buffer: {:?}", self.format, e))?;

        ezk_image::convert(&src_image, &mut dst_image)
            .map_err(|e| anyhow!("{:?} -> {:?} conversion failed: {:?}", self.format, dst_format, e))
    }
}

fn ezk_format(format: PixelFormat) -> ezk_image::PixelFormat {
    match format {
        PixelFormat::Rgb => ezk_image::PixelFormat::RGB,
        PixelFormat::Rgba => ezk_image::PixelFormat::RGBA,
        PixelFormat::Yuyv => ezk_image::PixelFormat::YUYV,
        PixelFormat::Nv12 => ezk_image::PixelFormat::NV12,
    }
}

fn ezk_color(format: PixelFormat) -> ezk_image::ColorInfo {
    match format {
        PixelFormat::Rgb | PixelFormat::Rgba => ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
            transfer: ezk_image::ColorTransfer::Linear,
            primaries: ezk_image::ColorPrimaries::BT709,
        }),
        PixelFormat::Yuyv | PixelFormat::Nv12 => ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
            transfer: ezk_image::ColorTransfer::Linear,
            primaries: ezk_image::ColorPrimaries::BT709,
            space: ezk_image::ColorSpace::BT709,
            full_range: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba().unwrap();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_zero_sized_frame_is_not_ready() {
        assert!(!VideoFrame::new(0, 480, PixelFormat::Rgba).is_ready());
        assert!(!VideoFrame::new(640, 0, PixelFormat::Rgba).is_ready());
        assert!(VideoFrame::new(1, 1, PixelFormat::Rgba).is_ready());
    }

    #[test]
    fn test_filled_frame() {
        let frame = VideoFrame::filled(3, 2, [1, 2, 3, 4]);
        assert!(frame.has_valid_size());
        assert_eq!(frame.rgba_at(2, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.rgba_at(3, 1), None);
    }

    #[test]
    fn test_truncated_buffer_is_rejected() {
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, vec![0; 5]);
        assert!(!frame.has_valid_size());
        assert!(frame.to_rgba().is_err());
    }

    #[test]
    fn test_nv12_frame_size_rounds_chroma() {
        // 3x3: 9 luma bytes + 4-wide, 2-tall interleaved chroma plane
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }
}
