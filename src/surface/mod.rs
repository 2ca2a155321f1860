//! Drawing surfaces the compositor renders into.
//!
//! A surface is a resizable RGBA canvas with the handful of primitives the
//! background effects need. `CpuSurface` implements it on the CPU; a GPU
//! implementation only has to provide the same operations.

pub mod blur;
mod cpu;

pub use cpu::CpuSurface;

use crate::error::FrameError;
use crate::frame::VideoFrame;
use image::RgbaImage;

/// A radial white-ish wash laid over a surface with source-atop compositing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialMask {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    pub color: [u8; 3],
    /// Opacity of `color` at the center.
    pub inner_alpha: f32,
    /// Opacity of `color` at `radius` and beyond.
    pub outer_alpha: f32,
}

impl RadialMask {
    /// The soft-focus vignette used by blur mode: centered, radius 30% of the
    /// shorter side, white fading from 0.8 to 0.1 opacity.
    pub fn soft_focus(width: u32, height: u32) -> Self {
        Self {
            center_x: width as f32 / 2.0,
            center_y: height as f32 / 2.0,
            radius: width.min(height) as f32 * 0.3,
            color: [255, 255, 255],
            inner_alpha: 0.8,
            outer_alpha: 0.1,
        }
    }
}

/// Capabilities a drawing surface must offer.
///
/// Pixel exchange (`get_pixels`, `put_pixels`, `export`) uses straight alpha.
pub trait Surface {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Resizes the surface and clears it to transparent black.
    /// Clearing also lifts any cross-origin taint.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameError>;

    /// Clears to transparent black and lifts any cross-origin taint.
    fn clear(&mut self);

    /// Draws an RGBA frame over the whole surface, scaling if needed.
    fn draw_frame(&mut self, frame: &VideoFrame) -> Result<(), FrameError>;

    /// Draws an image over the whole surface, scaling if needed.
    /// Drawing an image that is not `readable` taints the surface.
    fn draw_image(&mut self, image: &RgbaImage, readable: bool) -> Result<(), FrameError>;

    /// Fills the surface with a linear gradient from the top-left corner to
    /// the bottom-right corner.
    fn fill_diagonal_gradient(&mut self, from: [u8; 3], to: [u8; 3]) -> Result<(), FrameError>;

    /// Gaussian-blurs the current contents and draws the result over them.
    fn apply_blur(&mut self, sigma: f32) -> Result<(), FrameError>;

    fn blend_radial_mask(&mut self, mask: &RadialMask) -> Result<(), FrameError>;

    /// Reads the surface back. Fails with `ReadbackDenied` when tainted.
    fn get_pixels(&self) -> Result<RgbaImage, FrameError>;

    /// Replaces the surface contents; `pixels` must match the surface size.
    fn put_pixels(&mut self, pixels: &RgbaImage) -> Result<(), FrameError>;

    /// Copies the surface into an RGBA output frame, reusing its buffer.
    fn export(&self, out: &mut VideoFrame) -> Result<(), FrameError>;

    /// Drops the backing pixel storage.
    fn release(&mut self);
}
