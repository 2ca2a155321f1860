//! Subject/background classification for virtual-background mode.
//!
//! The default estimator is a colour heuristic, not a segmentation model:
//! skin-toned or bright pixels count as subject. Bright backgrounds are
//! misclassified as subject; that is the known cost of running it per frame
//! with no model.

use image::RgbaImage;

/// Smoothed mask values above this count as subject (0.5 of 255).
pub const SUBJECT_THRESHOLD: u8 = 127;

/// Produces a per-pixel subject mask (0 = background, 255 = subject).
pub trait SubjectMask: Send {
    /// Fills `mask` with one value per pixel of `frame`, resizing it as needed.
    fn estimate(&mut self, frame: &RgbaImage, mask: &mut Vec<u8>);
}

/// Skin-tone / brightness heuristic followed by a box smoothing pass.
#[derive(Debug, Clone)]
pub struct HeuristicMask {
    smoothing_radius: usize,
    integral: Vec<u32>,
}

impl HeuristicMask {
    pub const DEFAULT_SMOOTHING_RADIUS: usize = 2;

    pub fn new() -> Self {
        Self::with_smoothing_radius(Self::DEFAULT_SMOOTHING_RADIUS)
    }

    pub fn with_smoothing_radius(smoothing_radius: usize) -> Self {
        Self {
            smoothing_radius,
            integral: Vec::new(),
        }
    }
}

impl Default for HeuristicMask {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectMask for HeuristicMask {
    fn estimate(&mut self, frame: &RgbaImage, mask: &mut Vec<u8>) {
        mask.clear();
        mask.extend(
            frame
                .pixels()
                .map(|p| if is_subject_pixel(p[0], p[1], p[2]) { 255 } else { 0 }),
        );
        smooth_mask(
            mask,
            &mut self.integral,
            frame.width() as usize,
            frame.height() as usize,
            self.smoothing_radius,
        );
    }
}

/// Rough skin-tone test or plain brightness above 100.
#[inline]
pub fn is_subject_pixel(r: u8, g: u8, b: u8) -> bool {
    let brightness = (r as u16 + g as u16 + b as u16) as f32 / 3.0;
    let skin_tone = r > 95 && g > 40 && b > 20 && r > g && r > b;
    skin_tone || brightness > 100.0
}

/// Replaces every pixel at least `radius` away from the border with the
/// truncated mean of its `(2r+1)^2` neighbourhood. Border pixels keep their
/// value.
pub fn smooth_mask(mask: &mut [u8], integral: &mut Vec<u32>, width: usize, height: usize, radius: usize) {
    if radius == 0 || width <= 2 * radius || height <= 2 * radius || mask.len() < width * height {
        return;
    }

    // Summed-area table with a zero row/column in front
    let stride = width + 1;
    integral.clear();
    integral.resize(stride * (height + 1), 0);
    for y in 0..height {
        let mut row_sum = 0u32;
        for x in 0..width {
            row_sum += mask[y * width + x] as u32;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let count = ((2 * radius + 1) * (2 * radius + 1)) as u32;
    for y in radius..height - radius {
        let (top, bottom) = (y - radius, y + radius + 1);
        for x in radius..width - radius {
            let (left, right) = (x - radius, x + radius + 1);
            let sum = integral[bottom * stride + right] + integral[top * stride + left]
                - integral[top * stride + right]
                - integral[bottom * stride + left];
            mask[y * width + x] = (sum / count) as u8;
        }
    }
}

/// Share of pixels classified as subject after smoothing.
pub fn subject_coverage(mask: &[u8]) -> f32 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&v| v > SUBJECT_THRESHOLD).count() as f32 / mask.len() as f32
}
