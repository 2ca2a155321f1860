//! The per-frame background compositor.
//!
//! [`VideoBackgroundProcessor`] turns one camera frame into one output frame
//! according to the selected [`BackgroundMode`]. Settings live behind a
//! cloneable [`ProcessorControls`] handle so a UI or config watcher can change
//! them from other threads; every frame reads them exactly once, up front.

pub mod mask;
pub mod settings;

use crate::background::{
    find_preset, BackgroundImage, BackgroundLoad, BackgroundSlot, ScaledBackground, FALLBACK_GRADIENT,
};
use crate::error::{FrameError, LoadError};
use crate::frame::{PixelFormat, VideoFrame};
use crate::surface::{CpuSurface, RadialMask, Surface};
use mask::{HeuristicMask, SubjectMask, SUBJECT_THRESHOLD};
pub use settings::{BackgroundMode, BlurAmount};
use settings::EffectState;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Shared {
    effects: EffectState,
    background: Arc<BackgroundSlot>,
    disposed: AtomicBool,
}

/// Thread-safe handle to a processor's settings.
///
/// Writes are last-write-wins and take effect from the next processed frame.
/// After the processor is disposed every setter is inert.
#[derive(Debug, Clone)]
pub struct ProcessorControls {
    shared: Arc<Shared>,
}

impl ProcessorControls {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                effects: EffectState::new(),
                background: Arc::new(BackgroundSlot::default()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn mode(&self) -> BackgroundMode {
        self.shared.effects.mode()
    }

    pub fn set_mode(&self, mode: BackgroundMode) {
        if self.is_disposed() {
            debug!("Ignoring mode change to {} on disposed processor", mode);
            return;
        }
        let previous = self.mode();
        self.shared.effects.set_mode(mode);
        if previous != mode {
            info!("Background mode: {} -> {}", previous, mode);
        }
    }

    pub fn blur_amount(&self) -> BlurAmount {
        self.shared.effects.blur_amount()
    }

    /// Stores the blur radius, clamped into `[1, 50]`.
    pub fn set_blur_amount(&self, amount: f64) {
        if self.is_disposed() {
            return;
        }
        let clamped = BlurAmount::clamped(amount);
        if !BlurAmount::in_range(amount) {
            debug!("Blur amount {} clamped to {}", amount, clamped.get());
        }
        self.shared.effects.set_blur_amount(clamped);
    }

    /// Starts loading a background image from a URL, data URL or path.
    ///
    /// The load runs in the background and swaps the image in when decoded,
    /// even if the returned handle is dropped. On failure the previously held
    /// image stays in place.
    pub fn set_background_image(&self, url: &str) -> BackgroundLoad {
        if self.is_disposed() {
            return BackgroundLoad::ready(Err(LoadError::Disposed));
        }
        let url = url.trim().to_string();
        let label = url.clone();
        BackgroundLoad::spawn(self.shared.background.clone(), label, move || BackgroundImage::load(&url))
    }

    /// Loads one of the built-in [`crate::background::PRESETS`].
    pub fn set_background_preset(&self, id: &str) -> BackgroundLoad {
        if self.is_disposed() {
            return BackgroundLoad::ready(Err(LoadError::Disposed));
        }
        let Some(preset) = find_preset(id) else {
            return BackgroundLoad::ready(Err(LoadError::UnknownPreset(id.to_string())));
        };
        BackgroundLoad::spawn(self.shared.background.clone(), preset.name.to_string(), move || {
            BackgroundImage::from_preset(preset)
        })
    }

    /// The background image currently installed, if any.
    pub fn background(&self) -> Option<Arc<BackgroundImage>> {
        self.shared.background.current()
    }

    /// Whether frames are being transformed (mode is not `none`).
    pub fn is_processing(&self) -> bool {
        !self.is_disposed() && self.mode() != BackgroundMode::None
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Everything one frame needs, read once.
    fn snapshot(&self) -> (BackgroundMode, BlurAmount, Option<Arc<BackgroundImage>>) {
        let mode = self.mode();
        let background = match mode {
            BackgroundMode::Image => self.background(),
            _ => None,
        };
        (mode, self.blur_amount(), background)
    }

    fn dispose(&self) -> bool {
        let first = !self.shared.disposed.swap(true, Ordering::AcqRel);
        self.shared.background.close();
        first
    }
}

struct Surfaces<S> {
    /// Composited output
    main: S,
    /// Raw frame sample for mask analysis
    scratch: S,
}

/// Image-mode state that survives between frames.
struct Compositor {
    mask: Box<dyn SubjectMask>,
    mask_buffer: Vec<u8>,
    scaled: ScaledBackground,
    /// Id of the last non-readable image we warned about
    warned_unreadable: Option<u64>,
}

impl Compositor {
    fn new(mask: Box<dyn SubjectMask>) -> Self {
        Self {
            mask,
            mask_buffer: Vec::new(),
            scaled: ScaledBackground::default(),
            warned_unreadable: None,
        }
    }

    fn composite<S: Surface>(
        &mut self,
        surfaces: &mut Surfaces<S>,
        frame: &VideoFrame,
        background: Option<&BackgroundImage>,
    ) -> Result<(), FrameError> {
        let (width, height) = (frame.width, frame.height);
        let main = &mut surfaces.main;

        match background {
            Some(image) => {
                let scaled = self.scaled.get(image, width, height);
                main.draw_image(scaled, image.is_readable())?;
            }
            None => {
                self.scaled.clear();
                fill_fallback(main)?;
            }
        }

        surfaces.scratch.draw_frame(frame)?;
        let raw = surfaces.scratch.get_pixels()?;
        self.mask.estimate(&raw, &mut self.mask_buffer);

        let mut composed = match main.get_pixels() {
            Ok(pixels) => pixels,
            Err(FrameError::ReadbackDenied) => {
                if let Some(image) = background {
                    self.warn_unreadable(image);
                }
                main.clear();
                fill_fallback(main)?;
                main.get_pixels()?
            }
            Err(e) => return Err(e),
        };

        if self.mask_buffer.len() != raw.as_raw().len() / 4 {
            return Err(FrameError::BufferSize {
                expected: raw.as_raw().len() / 4,
                actual: self.mask_buffer.len(),
            });
        }
        for ((dst, src), &m) in composed.pixels_mut().zip(raw.pixels()).zip(&self.mask_buffer) {
            if m > SUBJECT_THRESHOLD {
                dst.0[..3].copy_from_slice(&src.0[..3]);
            }
        }
        main.put_pixels(&composed)
    }

    fn warn_unreadable(&mut self, image: &BackgroundImage) {
        if self.warned_unreadable == Some(image.id()) {
            return;
        }
        self.warned_unreadable = Some(image.id());
        warn!(
            "Background {} does not allow cross-origin pixel access, using gradient instead",
            crate::background::abbreviate(image.source())
        );
    }
}

fn fill_fallback<S: Surface>(surface: &mut S) -> Result<(), FrameError> {
    let (from, to) = FALLBACK_GRADIENT;
    surface.fill_diagonal_gradient(from, to)
}

/// Applies blur or virtual-background effects to a live video feed.
pub struct VideoBackgroundProcessor<S: Surface = CpuSurface> {
    controls: ProcessorControls,
    surfaces: Option<Surfaces<S>>,
    compositor: Compositor,
    output: VideoFrame,
}

impl VideoBackgroundProcessor<CpuSurface> {
    pub fn new() -> Self {
        Self::with_surfaces(CpuSurface::new(), CpuSurface::new())
    }
}

impl Default for VideoBackgroundProcessor<CpuSurface> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Surface> VideoBackgroundProcessor<S> {
    /// Builds a processor on caller-provided surfaces.
    pub fn with_surfaces(main: S, scratch: S) -> Self {
        debug!("Creating video background processor");
        Self {
            controls: ProcessorControls::new(),
            surfaces: Some(Surfaces { main, scratch }),
            compositor: Compositor::new(Box::new(HeuristicMask::new())),
            output: VideoFrame::new(0, 0, PixelFormat::Rgba),
        }
    }

    /// Replaces the subject estimator used in image mode.
    pub fn with_mask(mut self, mask: impl SubjectMask + 'static) -> Self {
        self.compositor = Compositor::new(Box::new(mask));
        self
    }

    /// A handle for changing settings from elsewhere.
    pub fn controls(&self) -> ProcessorControls {
        self.controls.clone()
    }

    pub fn mode(&self) -> BackgroundMode {
        self.controls.mode()
    }

    pub fn set_mode(&self, mode: BackgroundMode) {
        self.controls.set_mode(mode);
    }

    pub fn blur_amount(&self) -> BlurAmount {
        self.controls.blur_amount()
    }

    pub fn set_blur_amount(&self, amount: f64) {
        self.controls.set_blur_amount(amount);
    }

    pub fn set_background_image(&self, url: &str) -> BackgroundLoad {
        self.controls.set_background_image(url)
    }

    pub fn set_background_preset(&self, id: &str) -> BackgroundLoad {
        self.controls.set_background_preset(id)
    }

    pub fn is_processing(&self) -> bool {
        self.controls.is_processing()
    }

    /// Transforms one frame. `None` means "show the raw frame": the effect
    /// is off, the frame is not ready yet, the processor is disposed, or this
    /// frame failed to render.
    pub fn process_frame(&mut self, frame: &VideoFrame) -> Option<&VideoFrame> {
        if self.controls.is_disposed() {
            return None;
        }
        let (mode, blur, background) = self.controls.snapshot();
        if mode == BackgroundMode::None || !frame.is_ready() {
            return None;
        }

        let start = Instant::now();
        match self.render(frame, mode, blur, background.as_deref()) {
            Ok(()) => {
                debug!(
                    "[Perf] {} frame {}x{} processed in {:?}",
                    mode,
                    frame.width,
                    frame.height,
                    start.elapsed()
                );
                Some(&self.output)
            }
            Err(e) => {
                debug!("Skipping {} frame {}x{}: {}", mode, frame.width, frame.height, e);
                None
            }
        }
    }

    fn render(
        &mut self,
        frame: &VideoFrame,
        mode: BackgroundMode,
        blur: BlurAmount,
        background: Option<&BackgroundImage>,
    ) -> Result<(), FrameError> {
        let frame: Cow<'_, VideoFrame> = match frame.format {
            PixelFormat::Rgba => Cow::Borrowed(frame),
            _ => Cow::Owned(frame.to_rgba().map_err(|e| FrameError::Conversion(e.to_string()))?),
        };
        if !frame.has_valid_size() {
            return Err(FrameError::BufferSize {
                expected: frame.format.frame_size(frame.width, frame.height),
                actual: frame.data.len(),
            });
        }

        let surfaces = self.surfaces.as_mut().ok_or(FrameError::Disposed)?;
        let (width, height) = (frame.width, frame.height);
        if surfaces.main.width() != width || surfaces.main.height() != height {
            debug!("Resizing working surfaces to {}x{}", width, height);
        }
        surfaces.main.resize(width, height)?;
        surfaces.scratch.resize(width, height)?;

        match mode {
            BackgroundMode::Blur => {
                surfaces.main.draw_frame(&frame)?;
                surfaces.main.apply_blur(blur.get())?;
                surfaces.main.blend_radial_mask(&RadialMask::soft_focus(width, height))?;
            }
            BackgroundMode::Image => self.compositor.composite(surfaces, &frame, background)?,
            BackgroundMode::None => return Ok(()),
        }

        surfaces.main.export(&mut self.output)
    }

    /// Releases both surfaces and the background image. Later calls to
    /// `process_frame` return `None`; setters become inert.
    pub fn dispose(&mut self) {
        if !self.controls.dispose() {
            return;
        }
        if let Some(mut surfaces) = self.surfaces.take() {
            surfaces.main.release();
            surfaces.scratch.release();
        }
        self.compositor.scaled.clear();
        self.compositor.mask_buffer = Vec::new();
        self.output = VideoFrame::new(0, 0, PixelFormat::Rgba);
        info!("Video background processor disposed");
    }
}

impl<S: Surface> Drop for VideoBackgroundProcessor<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::{Rgba, RgbaImage};

    const DARK: [u8; 4] = [10, 10, 10, 255];
    const BRIGHT: [u8; 4] = [150, 150, 150, 255];

    fn close(a: [u8; 4], b: [u8; 4], tolerance: i32) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (*x as i32 - *y as i32).abs() <= tolerance)
    }

    fn png_data_url(color: [u8; 4]) -> String {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(8, 6, Rgba(color))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    fn install(processor: &VideoBackgroundProcessor, image: BackgroundImage) {
        let slot = &processor.controls.shared.background;
        let ticket = slot.begin().unwrap();
        slot.install(ticket, Arc::new(image)).unwrap();
    }

    struct EverythingIsSubject;

    impl SubjectMask for EverythingIsSubject {
        fn estimate(&mut self, frame: &RgbaImage, mask: &mut Vec<u8>) {
            mask.clear();
            mask.resize((frame.width() * frame.height()) as usize, 255);
        }
    }

    #[test]
    fn test_mode_is_idempotent() {
        let mut processor = VideoBackgroundProcessor::new();
        let frame = VideoFrame::filled(24, 16, BRIGHT);
        processor.set_mode(BackgroundMode::Blur);
        let once = processor.process_frame(&frame).unwrap().data.clone();
        processor.set_mode(BackgroundMode::Blur);
        assert_eq!(processor.mode(), BackgroundMode::Blur);
        assert_eq!(processor.process_frame(&frame).unwrap().data, once);
    }

    #[test]
    fn test_blur_amount_is_clamped() {
        let processor = VideoBackgroundProcessor::new();
        assert_eq!(processor.blur_amount(), BlurAmount::DEFAULT);
        processor.set_blur_amount(0.0);
        assert_eq!(processor.blur_amount().get(), 1.0);
        processor.set_blur_amount(999.0);
        assert_eq!(processor.blur_amount().get(), 50.0);
        processor.set_blur_amount(15.0);
        assert_eq!(processor.blur_amount().get(), 15.0);
    }

    #[test]
    fn test_none_mode_passes_through() {
        let mut processor = VideoBackgroundProcessor::new();
        assert!(!processor.is_processing());
        assert!(processor.process_frame(&VideoFrame::filled(8, 8, BRIGHT)).is_none());
    }

    #[test]
    fn test_not_ready_frames_produce_no_output() {
        let mut processor = VideoBackgroundProcessor::new();
        for mode in BackgroundMode::ALL {
            processor.set_mode(mode);
            assert!(processor.process_frame(&VideoFrame::new(0, 480, PixelFormat::Rgba)).is_none());
            assert!(processor.process_frame(&VideoFrame::new(640, 0, PixelFormat::Rgba)).is_none());
        }
    }

    #[test]
    fn test_truncated_frame_is_skipped() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Blur);
        let frame = VideoFrame::from_data(4, 4, PixelFormat::Rgba, vec![0; 10]);
        assert!(processor.process_frame(&frame).is_none());
        // the next good frame still renders
        assert!(processor.process_frame(&VideoFrame::filled(4, 4, DARK)).is_some());
    }

    #[test]
    fn test_image_mode_without_background_draws_gradient() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        let output = processor.process_frame(&VideoFrame::filled(32, 24, DARK)).unwrap();

        let top_left = output.rgba_at(0, 0).unwrap();
        let bottom_right = output.rgba_at(31, 23).unwrap();
        assert!(close(top_left, [0x66, 0x7e, 0xea, 255], 4), "{top_left:?}");
        assert!(close(bottom_right, [0x76, 0x4b, 0xa2, 255], 4), "{bottom_right:?}");
    }

    #[test]
    fn test_background_replacement_shows_only_latest_image() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        pollster::block_on(processor.set_background_image(&png_data_url([255, 0, 0, 255]))).unwrap();
        pollster::block_on(processor.set_background_image(&png_data_url([0, 0, 255, 255]))).unwrap();

        let output = processor.process_frame(&VideoFrame::filled(16, 12, DARK)).unwrap();
        assert!(output.data.chunks_exact(4).all(|p| p == [0, 0, 255, 255]));
    }

    #[test]
    fn test_failed_load_keeps_previous_background() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        processor.set_background_image(&png_data_url([0, 255, 0, 255])).wait().unwrap();

        let svg = "data:image/svg+xml;base64,PHN2Zy8+";
        assert!(matches!(
            processor.set_background_image(svg).wait(),
            Err(LoadError::Unsupported(_))
        ));
        assert!(matches!(
            processor.set_background_preset("space").wait(),
            Err(LoadError::UnknownPreset(_))
        ));

        let output = processor.process_frame(&VideoFrame::filled(8, 8, DARK)).unwrap();
        assert_eq!(output.rgba_at(4, 4), Some([0, 255, 0, 255]));
    }

    #[test]
    fn test_gradient_preset_becomes_background() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        processor.set_background_preset("blue-gradient").wait().unwrap();
        assert_eq!(processor.controls().background().unwrap().source(), "blue-gradient");

        let output = processor.process_frame(&VideoFrame::filled(40, 30, DARK)).unwrap();
        assert!(close(output.rgba_at(0, 0).unwrap(), [0x3b, 0x82, 0xf6, 255], 6));
    }

    #[test]
    fn test_bright_frame_is_mostly_subject() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        let output = processor.process_frame(&VideoFrame::filled(40, 30, BRIGHT)).unwrap();

        let subject = output.data.chunks_exact(4).filter(|p| *p == BRIGHT).count();
        assert!(subject as f32 / (40.0 * 30.0) >= 0.95);
    }

    #[test]
    fn test_subject_pixels_are_copied_over_background() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        install(
            &processor,
            BackgroundImage::new("black", RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]))),
        );

        // bright square in the middle of a dark frame
        let mut frame = VideoFrame::filled(20, 20, DARK);
        for y in 5..15 {
            for x in 5..15 {
                let i = (y * 20 + x) * 4;
                frame.data[i..i + 4].copy_from_slice(&BRIGHT);
            }
        }
        let output = processor.process_frame(&frame).unwrap();
        assert_eq!(output.rgba_at(10, 10), Some(BRIGHT));
        assert_eq!(output.rgba_at(1, 10), Some([0, 0, 0, 255]));
        assert_eq!(output.rgba_at(18, 18), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_custom_mask_replaces_heuristic() {
        let mut processor = VideoBackgroundProcessor::new().with_mask(EverythingIsSubject);
        processor.set_mode(BackgroundMode::Image);
        let output = processor.process_frame(&VideoFrame::filled(10, 10, DARK)).unwrap();
        assert!(output.data.chunks_exact(4).all(|p| p == DARK));
    }

    #[test]
    fn test_output_follows_input_resolution() {
        let mut processor = VideoBackgroundProcessor::new();
        for mode in [BackgroundMode::Blur, BackgroundMode::Image] {
            processor.set_mode(mode);
            let output = processor.process_frame(&VideoFrame::filled(64, 48, DARK)).unwrap();
            assert_eq!((output.width, output.height), (64, 48));
            assert_eq!(output.data.len(), 64 * 48 * 4);

            let output = processor.process_frame(&VideoFrame::filled(32, 40, BRIGHT)).unwrap();
            assert_eq!((output.width, output.height), (32, 40));
            assert_eq!(output.data.len(), 32 * 40 * 4);
        }
    }

    #[test]
    fn test_blur_mode_adds_soft_focus_wash() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Blur);
        processor.set_blur_amount(4.0);
        let output = processor.process_frame(&VideoFrame::filled(40, 30, [0, 0, 0, 255])).unwrap();

        let center = output.rgba_at(20, 15).unwrap();
        let corner = output.rgba_at(0, 0).unwrap();
        assert!(close(center, [204, 204, 204, 255], 8), "{center:?}");
        assert!(close(corner, [26, 26, 26, 255], 4), "{corner:?}");
    }

    #[test]
    fn test_rgb_frames_are_accepted() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        let frame = VideoFrame::from_data(4, 4, PixelFormat::Rgb, [150u8; 4 * 4 * 3].to_vec());
        let output = processor.process_frame(&frame).unwrap();
        assert_eq!(output.format, PixelFormat::Rgba);
        assert_eq!(output.rgba_at(0, 0), Some(BRIGHT));
    }

    #[test]
    fn test_unreadable_background_falls_back_to_gradient() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Image);
        let image = BackgroundImage::new(
            "https://cdn.example.com/no-cors.jpg",
            RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255])),
        )
        .with_readable(false);
        let id = image.id();
        install(&processor, image);

        for _ in 0..2 {
            let output = processor.process_frame(&VideoFrame::filled(16, 16, DARK)).unwrap();
            let top_left = output.rgba_at(0, 0).unwrap();
            assert!(close(top_left, [0x66, 0x7e, 0xea, 255], 4), "{top_left:?}");
            assert!(output.data.chunks_exact(4).all(|p| p != [255, 0, 0, 255]));
        }
        assert_eq!(processor.compositor.warned_unreadable, Some(id));
    }

    #[test]
    fn test_dispose_is_safe() {
        let mut processor = VideoBackgroundProcessor::new();
        processor.set_mode(BackgroundMode::Blur);
        assert!(processor.is_processing());
        processor.dispose();
        processor.dispose();

        assert!(processor.process_frame(&VideoFrame::filled(8, 8, BRIGHT)).is_none());
        processor.set_mode(BackgroundMode::Image);
        processor.set_blur_amount(30.0);
        assert_eq!(processor.mode(), BackgroundMode::Blur);
        assert!(!processor.is_processing());
        assert!(matches!(
            processor.set_background_image(&png_data_url([1, 2, 3, 255])).wait(),
            Err(LoadError::Disposed)
        ));
        assert!(processor.controls().background().is_none());
    }

    #[test]
    fn test_controls_work_across_threads() {
        let mut processor = VideoBackgroundProcessor::new();
        let controls = processor.controls();
        std::thread::spawn(move || {
            controls.set_mode(BackgroundMode::Image);
            controls.set_blur_amount(22.0);
        })
        .join()
        .unwrap();

        assert_eq!(processor.mode(), BackgroundMode::Image);
        assert_eq!(processor.blur_amount().get(), 22.0);
        assert!(processor.process_frame(&VideoFrame::filled(4, 4, DARK)).is_some());
    }
}
