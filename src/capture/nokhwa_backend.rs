//! Camera capture through nokhwa.

use super::{CameraInfo, CaptureConfig, FrameSource};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};
use std::fmt::Display;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolutions tried after the requested one, largest first.
const FALLBACK_RESOLUTIONS: [(u32, u32); 3] = [(1280, 720), (640, 480), (320, 240)];

/// Uncompressed formats first (built-in laptop cameras), then MJPEG (USB webcams).
const FRAME_FORMATS: [FrameFormat; 3] = [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG];

/// Live camera feed decoded to RGB.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
    started: Instant,
}

impl NokhwaCapture {
    /// Returns a list of available camera devices.
    pub fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    /// Opens the camera as close to the requested size and rate as it allows.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        // Drivers often reject a "closest" request whose hint is far from
        // anything they support, so walk a list of likely formats until a
        // stream actually opens.
        let mut camera = None;
        for seed in seed_formats(config) {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            let Ok(mut cam) = Camera::new(CameraIndex::Index(config.device_index), requested) else {
                continue;
            };
            match cam.open_stream() {
                Ok(()) => {
                    info!("Opened camera {} with seed format {:?}", config.device_index, seed);
                    camera = Some(cam);
                    break;
                }
                Err(e) => debug!("Seed format {:?} rejected: {}", seed, e),
            }
        }
        let mut camera = camera.ok_or_else(|| {
            anyhow!(
                "Could not open a stream on camera index {} with any standard format",
                config.device_index
            )
        })?;

        match camera.compatible_camera_formats() {
            Ok(formats) if !formats.is_empty() => {
                if let Some(best) = formats.iter().copied().min_by_key(|f| format_distance(f, config)) {
                    if best != camera.camera_format() {
                        switch_format(&mut camera, best)?;
                    }
                }
            }
            Ok(_) => warn!("Camera reported no supported formats, keeping the seed format"),
            Err(e) => debug!("Could not query camera formats: {}", e),
        }

        let resolution = camera.resolution();
        info!("Camera streaming at {} @ {} fps", resolution, camera.frame_rate());

        Ok(Self {
            width: resolution.width(),
            height: resolution.height(),
            camera,
            started: Instant::now(),
        })
    }
}

fn seed_formats(config: &CaptureConfig) -> Vec<CameraFormat> {
    let requested = (config.width, config.height);
    let mut resolutions = vec![requested];
    resolutions.extend(FALLBACK_RESOLUTIONS.iter().copied().filter(|&r| r != requested));

    let mut rates = vec![config.fps.max(1)];
    rates.extend([30, 15].into_iter().filter(|&r| r != config.fps));

    let mut seeds = Vec::new();
    for &(w, h) in &resolutions {
        for &fps in &rates {
            for format in FRAME_FORMATS {
                seeds.push(CameraFormat::new(Resolution::new(w, h), format, fps));
            }
        }
    }
    seeds
}

/// Lower is better: pixel-count difference dominates, then frame rate, then
/// format preference.
fn format_distance(format: &CameraFormat, config: &CaptureConfig) -> u64 {
    let requested = config.width as i64 * config.height as i64;
    let actual = format.width() as i64 * format.height() as i64;
    let rate = (format.frame_rate() as i64 - config.fps as i64).unsigned_abs();
    let kind = FRAME_FORMATS
        .iter()
        .position(|f| *f == format.format())
        .unwrap_or(FRAME_FORMATS.len()) as u64;
    (requested - actual).unsigned_abs() * 1000 + rate * 10 + kind
}

fn switch_format(camera: &mut Camera, target: CameraFormat) -> Result<()> {
    let current = camera.camera_format();
    info!("Switching camera format to {:?}", target);
    if let Err(e) = camera.stop_stream() {
        debug!("Failed to stop camera stream before switching: {}", e);
    }

    reopen_or_restore(
        |format| -> Result<(), NokhwaError> {
            camera.set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(format)))?;
            camera.open_stream()
        },
        target,
        current,
    )
}

/// Opens `target`, falling back to `current`. Fails only when neither opens,
/// which leaves the camera without a running stream.
fn reopen_or_restore<E: Display>(
    mut open: impl FnMut(CameraFormat) -> Result<(), E>,
    target: CameraFormat,
    current: CameraFormat,
) -> Result<()> {
    let Err(e) = open(target) else {
        return Ok(());
    };
    warn!("Camera rejected {:?} ({}), restoring {:?}", target, e, current);
    open(current).map_err(|restore| {
        anyhow!(
            "Camera rejected {:?} ({}) and could not restore {:?}: {}",
            target,
            e,
            current,
            restore
        )
    })
}

impl FrameSource for NokhwaCapture {
    fn next_frame(&mut self) -> Result<VideoFrame> {
        let buffer = self.camera.frame()?;
        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = (decoded.width(), decoded.height());
        if (width, height) != (self.width, self.height) {
            debug!("Camera frame size changed to {}x{}", width, height);
            self.width = width;
            self.height = height;
        }

        let mut frame = VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw());
        frame.timestamp_us = Some(self.started.elapsed().as_micros() as u64);
        Ok(frame)
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for NokhwaCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            debug!("Failed to stop camera stream: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_formats_start_with_request() {
        let config = CaptureConfig {
            device_index: 0,
            width: 800,
            height: 600,
            fps: 24,
        };
        let seeds = seed_formats(&config);
        assert_eq!(seeds[0], CameraFormat::new(Resolution::new(800, 600), FrameFormat::NV12, 24));
        assert_eq!(seeds.len(), 4 * 3 * 3);
    }

    #[test]
    fn test_format_distance_prefers_requested_size() {
        let config = CaptureConfig::default();
        let exact = CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 30);
        let bigger = CameraFormat::new(Resolution::new(1920, 1080), FrameFormat::NV12, 30);
        let slower = CameraFormat::new(Resolution::new(640, 480), FrameFormat::NV12, 15);
        assert!(format_distance(&exact, &config) < format_distance(&bigger, &config));
        assert!(format_distance(&exact, &config) < format_distance(&slower, &config));
    }

    fn format(w: u32, h: u32) -> CameraFormat {
        CameraFormat::new(Resolution::new(w, h), FrameFormat::YUYV, 30)
    }

    #[test]
    fn test_accepted_format_needs_no_restore() {
        let mut tried = Vec::new();
        let result = reopen_or_restore(
            |f| {
                tried.push(f);
                Ok::<(), String>(())
            },
            format(1280, 720),
            format(640, 480),
        );
        assert!(result.is_ok());
        assert_eq!(tried, vec![format(1280, 720)]);
    }

    #[test]
    fn test_rejected_format_restores_previous() {
        let mut tried = Vec::new();
        let result = reopen_or_restore(
            |f| {
                tried.push(f);
                if f == format(1280, 720) {
                    Err("busy".to_string())
                } else {
                    Ok(())
                }
            },
            format(1280, 720),
            format(640, 480),
        );
        assert!(result.is_ok());
        assert_eq!(tried, vec![format(1280, 720), format(640, 480)]);
    }

    #[test]
    fn test_failed_restore_is_reported() {
        let err = reopen_or_restore(|_| Err("device gone"), format(1280, 720), format(640, 480)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("could not restore"));
        assert!(message.contains("device gone"));
    }
}
