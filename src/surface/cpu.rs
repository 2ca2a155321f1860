//! CPU surface backed by a tiny-skia pixmap.

use super::blur::gaussian_blur_rgba;
use super::{RadialMask, Surface};
use crate::error::FrameError;
use crate::frame::{PixelFormat, VideoFrame};
use image::{imageops, RgbaImage};
use tiny_skia::{
    BlendMode, Color, GradientStop, LinearGradient, Paint, Pixmap, Point, RadialGradient, Rect,
    Shader, SpreadMode, Transform,
};

/// Software surface. Pixels are stored premultiplied, as tiny-skia expects.
#[derive(Default)]
pub struct CpuSurface {
    pixmap: Option<Pixmap>,
    tainted: bool,
}

impl CpuSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// True after a non-readable image was drawn and before the next clear.
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    fn pixmap_mut(&mut self) -> Result<&mut Pixmap, FrameError> {
        self.pixmap
            .as_mut()
            .ok_or_else(|| FrameError::Draw("surface is not allocated".into()))
    }

    fn pixmap(&self) -> Result<&Pixmap, FrameError> {
        self.pixmap
            .as_ref()
            .ok_or_else(|| FrameError::Draw("surface is not allocated".into()))
    }

    /// Source-over draw of straight-alpha RGBA covering the full surface.
    fn draw_straight(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<(), FrameError> {
        let (sw, sh) = (self.width(), self.height());
        if width == sw && height == sh {
            let dst = self.pixmap_mut()?.data_mut();
            check_len(dst.len(), rgba.len())?;
            blend_over_straight(dst, rgba);
            return Ok(());
        }

        let src = RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or(FrameError::BufferSize {
            expected: width as usize * height as usize * 4,
            actual: rgba.len(),
        })?;
        let scaled = imageops::resize(&src, sw, sh, imageops::FilterType::Triangle);
        let dst = self.pixmap_mut()?.data_mut();
        check_len(dst.len(), scaled.as_raw().len())?;
        blend_over_straight(dst, scaled.as_raw());
        Ok(())
    }

    fn fill_with(&mut self, shader: Shader<'_>, blend_mode: BlendMode) -> Result<(), FrameError> {
        let (w, h) = (self.width() as f32, self.height() as f32);
        let rect = Rect::from_xywh(0.0, 0.0, w, h)
            .ok_or_else(|| FrameError::Draw(format!("invalid fill rect {w}x{h}")))?;

        let mut paint = Paint::default();
        paint.shader = shader;
        paint.blend_mode = blend_mode;
        self.pixmap_mut()?.fill_rect(rect, &paint, Transform::identity(), None);
        Ok(())
    }
}

impl Surface for CpuSurface {
    fn width(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, |p| p.width())
    }

    fn height(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, |p| p.height())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameError> {
        if self.width() == width && self.height() == height && self.pixmap.is_some() {
            self.clear();
            return Ok(());
        }
        self.pixmap = Some(Pixmap::new(width, height).ok_or(FrameError::SurfaceAlloc { width, height })?);
        self.tainted = false;
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.fill(Color::TRANSPARENT);
        }
        self.tainted = false;
    }

    fn draw_frame(&mut self, frame: &VideoFrame) -> Result<(), FrameError> {
        if frame.format == PixelFormat::Rgba {
            return self.draw_straight(frame.width, frame.height, &frame.data);
        }
        let rgba = frame.to_rgba().map_err(|e| FrameError::Conversion(e.to_string()))?;
        self.draw_straight(rgba.width, rgba.height, &rgba.data)
    }

    fn draw_image(&mut self, image: &RgbaImage, readable: bool) -> Result<(), FrameError> {
        self.draw_straight(image.width(), image.height(), image.as_raw())?;
        if !readable {
            self.tainted = true;
        }
        Ok(())
    }

    fn fill_diagonal_gradient(&mut self, from: [u8; 3], to: [u8; 3]) -> Result<(), FrameError> {
        let (w, h) = (self.width() as f32, self.height() as f32);
        let shader = LinearGradient::new(
            Point::from_xy(0.0, 0.0),
            Point::from_xy(w, h),
            vec![
                GradientStop::new(0.0, Color::from_rgba8(from[0], from[1], from[2], 255)),
                GradientStop::new(1.0, Color::from_rgba8(to[0], to[1], to[2], 255)),
            ],
            SpreadMode::Pad,
            Transform::identity(),
        )
        .ok_or_else(|| FrameError::Draw("degenerate linear gradient".into()))?;
        self.fill_with(shader, BlendMode::SourceOver)
    }

    fn apply_blur(&mut self, sigma: f32) -> Result<(), FrameError> {
        let (w, h) = (self.width() as usize, self.height() as usize);
        let pixmap = self.pixmap_mut()?;
        let mut blurred = pixmap.data().to_vec();
        gaussian_blur_rgba(&mut blurred, w, h, sigma);
        blend_over_premultiplied(pixmap.data_mut(), &blurred);
        Ok(())
    }

    fn blend_radial_mask(&mut self, mask: &RadialMask) -> Result<(), FrameError> {
        let [r, g, b] = mask.color.map(|c| c as f32 / 255.0);
        let stop = |pos: f32, alpha: f32| -> Result<GradientStop, FrameError> {
            let color = Color::from_rgba(r, g, b, alpha.clamp(0.0, 1.0))
                .ok_or_else(|| FrameError::Draw(format!("invalid mask alpha {alpha}")))?;
            Ok(GradientStop::new(pos, color))
        };
        let center = Point::from_xy(mask.center_x, mask.center_y);
        let shader = RadialGradient::new(
            center,
            center,
            mask.radius,
            vec![stop(0.0, mask.inner_alpha)?, stop(1.0, mask.outer_alpha)?],
            SpreadMode::Pad,
            Transform::identity(),
        )
        .ok_or_else(|| FrameError::Draw(format!("degenerate radial gradient (radius {})", mask.radius)))?;
        self.fill_with(shader, BlendMode::SourceAtop)
    }

    fn get_pixels(&self) -> Result<RgbaImage, FrameError> {
        if self.tainted {
            return Err(FrameError::ReadbackDenied);
        }
        let pixmap = self.pixmap()?;
        let mut data = vec![0u8; pixmap.data().len()];
        demultiply_into(&mut data, pixmap.data());
        RgbaImage::from_raw(pixmap.width(), pixmap.height(), data).ok_or(FrameError::BufferSize {
            expected: pixmap.width() as usize * pixmap.height() as usize * 4,
            actual: pixmap.data().len(),
        })
    }

    fn put_pixels(&mut self, pixels: &RgbaImage) -> Result<(), FrameError> {
        if pixels.width() != self.width() || pixels.height() != self.height() {
            return Err(FrameError::BufferSize {
                expected: self.width() as usize * self.height() as usize * 4,
                actual: pixels.as_raw().len(),
            });
        }
        let dst = self.pixmap_mut()?.data_mut();
        for (d, s) in dst.chunks_exact_mut(4).zip(pixels.as_raw().chunks_exact(4)) {
            let a = s[3] as u32;
            d[0] = premultiply(s[0], a);
            d[1] = premultiply(s[1], a);
            d[2] = premultiply(s[2], a);
            d[3] = s[3];
        }
        Ok(())
    }

    fn export(&self, out: &mut VideoFrame) -> Result<(), FrameError> {
        let pixmap = self.pixmap()?;
        out.width = pixmap.width();
        out.height = pixmap.height();
        out.format = PixelFormat::Rgba;
        out.data.resize(pixmap.data().len(), 0);
        demultiply_into(&mut out.data, pixmap.data());
        Ok(())
    }

    fn release(&mut self) {
        self.pixmap = None;
        self.tainted = false;
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), FrameError> {
    if expected == actual {
        Ok(())
    } else {
        Err(FrameError::BufferSize { expected, actual })
    }
}

#[inline]
fn premultiply(c: u8, a: u32) -> u8 {
    ((c as u32 * a + 127) / 255) as u8
}

/// `dst` (premultiplied) = `src` (straight) over `dst`.
fn blend_over_straight(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u32;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        let inv = 255 - a;
        for c in 0..3 {
            d[c] = (premultiply(s[c], a) as u32 + (d[c] as u32 * inv + 127) / 255).min(255) as u8;
        }
        d[3] = (a + (d[3] as u32 * inv + 127) / 255).min(255) as u8;
    }
}

/// `dst` = `src` over `dst`, both premultiplied.
fn blend_over_premultiplied(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let inv = 255 - s[3] as u32;
        for c in 0..4 {
            d[c] = (s[c] as u32 + (d[c] as u32 * inv + 127) / 255).min(255) as u8;
        }
    }
}

fn demultiply_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u32;
        if a == 0 {
            d.copy_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            d[c] = ((s[c] as u32 * 255 + a / 2) / a).min(255) as u8;
        }
        d[3] = s[3];
    }
}
