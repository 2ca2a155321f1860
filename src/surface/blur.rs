//! Separable gaussian blur over premultiplied RGBA buffers.
//!
//! Pixels outside the buffer count as transparent black, which is what a
//! canvas `blur()` filter does. Small deviations use a sampled gaussian
//! kernel; from `sigma >= 2.0` on, three successive box blurs approximate it
//! in constant time per pixel.

/// Deviation at which the box approximation takes over.
const BOX_APPROXIMATION_THRESHOLD: f32 = 2.0;

/// Blurs `data` (premultiplied RGBA, `width * height * 4` bytes) in place.
pub fn gaussian_blur_rgba(data: &mut [u8], width: usize, height: usize, sigma: f32) {
    if width == 0 || height == 0 || sigma <= 0.0 || data.len() < width * height * 4 {
        return;
    }

    let mut src: Vec<f32> = data[..width * height * 4].iter().map(|&v| v as f32).collect();
    let mut tmp = vec![0.0f32; src.len()];

    if sigma < BOX_APPROXIMATION_THRESHOLD {
        let kernel = gaussian_kernel(sigma);
        convolve(&src, &mut tmp, width, height, &kernel, Axis::Horizontal);
        convolve(&tmp, &mut src, width, height, &kernel, Axis::Vertical);
    } else {
        for size in box_sizes(sigma, 3) {
            let radius = (size - 1) / 2;
            box_pass(&src, &mut tmp, width, height, radius, Axis::Horizontal);
            box_pass(&tmp, &mut src, width, height, radius, Axis::Vertical);
        }
    }

    for (dst, v) in data.iter_mut().zip(src) {
        *dst = v.round().clamp(0.0, 255.0) as u8;
    }
}

/// Normalized 1D gaussian kernel covering three deviations on each side.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-((x * x) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Widths of `n` box filters whose succession approximates a gaussian of `sigma`.
pub fn box_sizes(sigma: f32, n: usize) -> Vec<usize> {
    let n_f = n as f32;
    let ideal = (12.0 * sigma * sigma / n_f + 1.0).sqrt();
    let mut lower = ideal.floor() as i32;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;

    let lf = lower as f32;
    let m = ((12.0 * sigma * sigma - n_f * lf * lf - 4.0 * n_f * lf - 3.0 * n_f) / (-4.0 * lf - 4.0))
        .round()
        .max(0.0) as usize;

    (0..n)
        .map(|i| if i < m { lower as usize } else { upper as usize })
        .collect()
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    /// (lines, samples per line, stride between lines, stride between samples)
    fn layout(self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        match self {
            Axis::Horizontal => (height, width, width * 4, 4),
            Axis::Vertical => (width, height, 4, width * 4),
        }
    }
}

fn convolve(src: &[f32], dst: &mut [f32], width: usize, height: usize, kernel: &[f32], axis: Axis) {
    let (lines, len, line_stride, step) = axis.layout(width, height);
    let radius = (kernel.len() / 2) as isize;

    for line in 0..lines {
        let base = line * line_stride;
        for i in 0..len {
            let mut acc = [0.0f32; 4];
            for (k, w) in kernel.iter().enumerate() {
                let j = i as isize + k as isize - radius;
                if j < 0 || j >= len as isize {
                    continue;
                }
                let idx = base + j as usize * step;
                for c in 0..4 {
                    acc[c] += src[idx + c] * w;
                }
            }
            let out = base + i * step;
            dst[out..out + 4].copy_from_slice(&acc);
        }
    }
}

fn box_pass(src: &[f32], dst: &mut [f32], width: usize, height: usize, radius: usize, axis: Axis) {
    let (lines, len, line_stride, step) = axis.layout(width, height);
    let norm = 1.0 / (2 * radius + 1) as f32;

    for line in 0..lines {
        let base = line * line_stride;
        for c in 0..4 {
            // Running sum over [i - radius, i + radius]
            let mut acc = 0.0f32;
            for j in 0..=radius.min(len - 1) {
                acc += src[base + j * step + c];
            }
            for i in 0..len {
                dst[base + i * step + c] = acc * norm;
                let incoming = i + radius + 1;
                if incoming < len {
                    acc += src[base + incoming * step + c];
                }
                if i >= radius {
                    acc -= src[base + (i - radius) * step + c];
                }
            }
        }
    }
}
