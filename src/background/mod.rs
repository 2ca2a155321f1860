//! Background images for virtual-background mode.
//!
//! Images are decoded off the frame loop and published through a
//! [`BackgroundSlot`]. Frames grab an `Arc` to whatever is installed when they
//! start, so a swap never tears a frame and the old image is freed once the
//! last in-flight frame drops it.

mod fetch;
pub mod presets;

pub use fetch::{decode_data_url, fetch, Fetched, ImageLocation};
pub use presets::{find_preset, BackgroundPreset, PresetSource, PRESETS};

use crate::error::LoadError;
use crate::surface::{CpuSurface, Surface};
use futures::channel::oneshot;
use image::{imageops, RgbaImage};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Gradient drawn when image mode has no (readable) background.
pub const FALLBACK_GRADIENT: ([u8; 3], [u8; 3]) = ([0x66, 0x7e, 0xea], [0x76, 0x4b, 0xa2]);

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A decoded background bitmap.
#[derive(Debug)]
pub struct BackgroundImage {
    id: u64,
    source: String,
    pixels: RgbaImage,
    readable: bool,
}

impl BackgroundImage {
    pub fn new(source: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            source: source.into(),
            pixels,
            readable: true,
        }
    }

    /// Marks whether the origin allowed pixel read-back.
    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    /// Unique per decoded image; used to key scaled copies.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Fetches and decodes an image URL. Blocking.
    pub fn load(url: &str) -> Result<Self, LoadError> {
        let fetched = fetch(url)?;
        Self::decode(url, fetched)
    }

    /// Decodes fetched bytes into a bitmap. Vector formats are rejected.
    pub fn decode(source: &str, fetched: Fetched) -> Result<Self, LoadError> {
        let looks_like_svg = fetched.media_type.as_deref().is_some_and(|t| t.contains("svg"))
            || fetched.bytes.trim_ascii_start().starts_with(b"<svg")
            || fetched.bytes.trim_ascii_start().starts_with(b"<?xml");
        if looks_like_svg {
            return Err(LoadError::Unsupported("SVG backgrounds are not rasterized".to_string()));
        }

        let pixels = image::load_from_memory(&fetched.bytes)?.to_rgba8();
        debug!(
            "Decoded background {}x{} from {}",
            pixels.width(),
            pixels.height(),
            abbreviate(source)
        );
        Ok(Self::new(source, pixels).with_readable(fetched.cross_origin_readable))
    }

    /// Renders a diagonal gradient bitmap.
    pub fn gradient(source: &str, width: u32, height: u32, from: [u8; 3], to: [u8; 3]) -> Result<Self, LoadError> {
        let render = || -> Result<RgbaImage, crate::error::FrameError> {
            let mut surface = CpuSurface::new();
            surface.resize(width, height)?;
            surface.fill_diagonal_gradient(from, to)?;
            surface.get_pixels()
        };
        let pixels = render().map_err(|e| LoadError::Decode(format!("gradient render failed: {e}")))?;
        Ok(Self::new(source, pixels))
    }

    /// Produces the bitmap for a built-in preset. Blocking for remote presets.
    pub fn from_preset(preset: &BackgroundPreset) -> Result<Self, LoadError> {
        match preset.source {
            PresetSource::Remote(url) => Self::load(url),
            PresetSource::Gradient { from, to } => {
                let (w, h) = presets::GRADIENT_PRESET_SIZE;
                Self::gradient(preset.id, w, h, from, to)
            }
        }
    }
}

/// Shortens data URLs for log lines.
pub(crate) fn abbreviate(source: &str) -> String {
    const MAX: usize = 64;
    if source.len() <= MAX {
        return source.to_string();
    }
    let cut = (0..=MAX).rev().find(|&i| source.is_char_boundary(i)).unwrap_or(0);
    format!("{}…", &source[..cut])
}

/// The one background image a processor holds, swapped atomically.
#[derive(Debug, Default)]
pub(crate) struct BackgroundSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<Arc<BackgroundImage>>,
    /// Ticket of the load that produced `current`
    installed: u64,
    /// Last ticket handed out
    issued: u64,
    closed: bool,
}

impl BackgroundSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a ticket for a new load, or `None` once closed.
    pub fn begin(&self) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.issued += 1;
        Some(state.issued)
    }

    /// Installs `image` unless a load issued later has already installed its
    /// own, in which case the image is dropped and `Superseded` returned.
    pub fn install(&self, ticket: u64, image: Arc<BackgroundImage>) -> Result<(), LoadError> {
        let mut state = self.lock();
        if state.closed {
            return Err(LoadError::Disposed);
        }
        if ticket < state.installed {
            return Err(LoadError::Superseded);
        }
        state.installed = ticket;
        state.current = Some(image);
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<BackgroundImage>> {
        self.lock().current.clone()
    }

    /// Drops the held image and refuses further loads.
    pub fn close(&self) {
        let mut state = self.lock();
        state.current = None;
        state.closed = true;
    }
}

/// Downscaled/upscaled copy of the current background at frame size.
#[derive(Debug, Default)]
pub(crate) struct ScaledBackground {
    key: Option<(u64, u32, u32)>,
    image: Option<RgbaImage>,
}

impl ScaledBackground {
    pub fn get<'a>(&'a mut self, background: &'a BackgroundImage, width: u32, height: u32) -> &'a RgbaImage {
        if background.width() == width && background.height() == height {
            return background.pixels();
        }
        let key = (background.id(), width, height);
        if self.key != Some(key) {
            self.image = None;
            self.key = Some(key);
        }
        self.image.get_or_insert_with(|| {
            let start = Instant::now();
            let scaled = imageops::resize(background.pixels(), width, height, imageops::FilterType::Triangle);
            debug!("[Perf] Scaled background to {}x{} in {:?}", width, height, start.elapsed());
            scaled
        })
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.image = None;
    }
}

/// Completion of an asynchronous background load.
///
/// The load runs on its own thread and installs the image whether or not this
/// handle is awaited; awaiting only reports the outcome.
pub struct BackgroundLoad {
    state: LoadState,
}

enum LoadState {
    Pending(oneshot::Receiver<Result<(), LoadError>>),
    Done(Option<Result<(), LoadError>>),
}

impl BackgroundLoad {
    /// Runs `job` on a loader thread and installs its image into `slot`.
    pub(crate) fn spawn<F>(slot: Arc<BackgroundSlot>, label: String, job: F) -> Self
    where
        F: FnOnce() -> Result<BackgroundImage, LoadError> + Send + 'static,
    {
        let Some(ticket) = slot.begin() else {
            return Self::ready(Err(LoadError::Disposed));
        };

        let (tx, rx) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name("background-loader".to_string())
            .spawn(move || {
                let start = Instant::now();
                let result = job().and_then(|image| slot.install(ticket, Arc::new(image)));
                match &result {
                    Ok(()) => info!("Background {} ready in {:?}", abbreviate(&label), start.elapsed()),
                    Err(LoadError::Superseded) => {
                        debug!("Discarding background {}, a newer one is already showing", abbreviate(&label))
                    }
                    Err(e) => warn!("Background {} failed to load: {}", abbreviate(&label), e),
                }
                // The caller may have dropped its handle
                let _ = tx.send(result);
            });

        match spawned {
            Ok(_) => Self {
                state: LoadState::Pending(rx),
            },
            Err(e) => Self::ready(Err(LoadError::Io(e))),
        }
    }

    /// An already-finished load.
    pub fn ready(result: Result<(), LoadError>) -> Self {
        Self {
            state: LoadState::Done(Some(result)),
        }
    }

    /// Non-blocking check. Returns the outcome once, when it is available.
    pub fn try_result(&mut self) -> Option<Result<(), LoadError>> {
        let outcome = match &mut self.state {
            LoadState::Done(result) => return result.take(),
            LoadState::Pending(rx) => match rx.try_recv() {
                Ok(None) => return None,
                Ok(Some(result)) => result,
                Err(oneshot::Canceled) => Err(LoadError::Cancelled),
            },
        };
        self.state = LoadState::Done(None);
        Some(outcome)
    }

    /// Blocks the current thread until the load finishes.
    pub fn wait(self) -> Result<(), LoadError> {
        pollster::block_on(self)
    }
}

impl Future for BackgroundLoad {
    type Output = Result<(), LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = match &mut this.state {
            LoadState::Done(result) => return Poll::Ready(result.take().unwrap_or(Err(LoadError::Cancelled))),
            LoadState::Pending(rx) => Pin::new(rx).poll(cx),
        };
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(received) => {
                this.state = LoadState::Done(None);
                Poll::Ready(received.unwrap_or(Err(LoadError::Cancelled)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::io::Write;

    fn solid(color: [u8; 4]) -> BackgroundImage {
        BackgroundImage::new("test", RgbaImage::from_pixel(4, 4, Rgba(color)))
    }

    fn png_bytes(color: [u8; 4]) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(3, 2, Rgba(color))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_slot_prefers_newer_loads() {
        let slot = BackgroundSlot::default();
        let a = slot.begin().unwrap();
        let b = slot.begin().unwrap();

        slot.install(b, Arc::new(solid([0, 0, 255, 255]))).unwrap();
        // A finishes late and must not clobber B
        assert!(matches!(
            slot.install(a, Arc::new(solid([255, 0, 0, 255]))),
            Err(LoadError::Superseded)
        ));
        assert_eq!(slot.current().unwrap().pixels().get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_closed_slot_rejects_loads() {
        let slot = BackgroundSlot::default();
        let ticket = slot.begin().unwrap();
        slot.install(ticket, Arc::new(solid([1, 1, 1, 255]))).unwrap();
        slot.close();
        assert!(slot.current().is_none());
        assert!(slot.begin().is_none());
        assert!(matches!(
            slot.install(ticket + 1, Arc::new(solid([1, 1, 1, 255]))),
            Err(LoadError::Disposed)
        ));
    }

    #[test]
    fn test_in_flight_reference_survives_swap() {
        let slot = BackgroundSlot::default();
        let first = slot.begin().unwrap();
        slot.install(first, Arc::new(solid([9, 9, 9, 255]))).unwrap();
        let held = slot.current().unwrap();

        let second = slot.begin().unwrap();
        slot.install(second, Arc::new(solid([7, 7, 7, 255]))).unwrap();
        assert_eq!(held.pixels().get_pixel(0, 0).0, [9, 9, 9, 255]);
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn test_decode_png_data_url() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes([10, 20, 30, 255]));
        let image = BackgroundImage::load(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert!(image.is_readable());
        assert_eq!(image.pixels().get_pixel(2, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_rejects_svg() {
        let svg = "data:image/svg+xml;base64,PHN2ZyB3aWR0aD0iODAwIiBoZWlnaHQ9IjYwMCIvPg==";
        assert!(matches!(BackgroundImage::load(svg), Err(LoadError::Unsupported(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = BackgroundImage::load("data:application/octet-stream;base64,AAECAwQF");
        assert!(matches!(result, Err(LoadError::Unsupported(_)) | Err(LoadError::Decode(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&png_bytes([0, 200, 0, 255])).unwrap();
        let image = BackgroundImage::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(image.pixels().get_pixel(0, 0).0, [0, 200, 0, 255]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            BackgroundImage::load("/definitely/not/here.png"),
            Err(LoadError::Io(_))
        ));
    }

    #[test]
    fn test_gradient_preset_renders_locally() {
        let preset = find_preset("purple-gradient").unwrap();
        let image = BackgroundImage::from_preset(preset).unwrap();
        assert_eq!((image.width(), image.height()), presets::GRADIENT_PRESET_SIZE);
        let top_left = image.pixels().get_pixel(0, 0).0;
        assert!((top_left[0] as i32 - 0x66).abs() <= 3);
        assert!((top_left[2] as i32 - 0xea).abs() <= 3);
    }

    #[test]
    fn test_scaled_background_is_cached_per_size() {
        let background = solid([5, 6, 7, 255]);
        let mut scaled = ScaledBackground::default();
        assert_eq!(scaled.get(&background, 4, 4).dimensions(), (4, 4));
        assert!(scaled.key.is_none());

        assert_eq!(scaled.get(&background, 8, 2).dimensions(), (8, 2));
        assert_eq!(scaled.key, Some((background.id(), 8, 2)));
        assert_eq!(scaled.get(&background, 8, 2).get_pixel(7, 1).0, [5, 6, 7, 255]);
    }

    #[test]
    fn test_load_future_reports_outcome() {
        let slot = Arc::new(BackgroundSlot::default());
        let load = BackgroundLoad::spawn(slot.clone(), "solid".into(), || Ok(solid([3, 3, 3, 255])));
        assert!(load.wait().is_ok());
        assert!(slot.current().is_some());

        let failing = BackgroundLoad::spawn(slot.clone(), "broken".into(), || {
            Err(LoadError::Fetch("offline".into()))
        });
        assert!(matches!(pollster::block_on(failing), Err(LoadError::Fetch(_))));
        // the earlier image is still in place
        assert_eq!(slot.current().unwrap().pixels().get_pixel(0, 0).0, [3, 3, 3, 255]);
    }

    #[test]
    fn test_late_load_reports_superseded() {
        let slot = Arc::new(BackgroundSlot::default());
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let older = BackgroundLoad::spawn(slot.clone(), "older".into(), move || {
            let _ = release_rx.recv();
            Ok(solid([255, 0, 0, 255]))
        });
        BackgroundLoad::spawn(slot.clone(), "newer".into(), || Ok(solid([0, 0, 255, 255])))
            .wait()
            .unwrap();

        release_tx.send(()).unwrap();
        assert!(matches!(older.wait(), Err(LoadError::Superseded)));
        assert_eq!(slot.current().unwrap().pixels().get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_try_result_yields_once() {
        let mut load = BackgroundLoad::ready(Ok(()));
        assert!(matches!(load.try_result(), Some(Ok(()))));
        assert!(load.try_result().is_none());
    }

    #[test]
    fn test_abbreviate_long_sources() {
        let long = format!("data:image/png;base64,{}", "A".repeat(200));
        assert!(abbreviate(&long).chars().count() <= 65);
        assert_eq!(abbreviate("short"), "short");
    }
}
