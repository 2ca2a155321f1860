//! v4l2loopback virtual camera, so video-call apps can pick up the processed feed.
//!
//! Requires the v4l2loopback kernel module:
//! `sudo modprobe v4l2loopback devices=1 video_nr=10 card_label="Backdrop Camera" exclusive_caps=1`

use super::RenderSink;
use crate::frame::VideoFrame;
use anyhow::{anyhow, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Default v4l2loopback device path.
pub const DEFAULT_DEVICE: &str = "/dev/video10";

// _IOWR('V', 5, struct v4l2_format)
const VIDIOC_S_FMT: u64 = 0xC0D0_5605;
const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
const V4L2_FIELD_NONE: u32 = 1;
const V4L2_COLORSPACE_SRGB: u32 = 8;
// 'Y' 'U' 'Y' 'V'
const V4L2_PIX_FMT_YUYV: u32 = 0x5659_5559;

#[repr(C)]
struct V4l2Format {
    type_: u32,
    fmt: V4l2FormatUnion,
}

#[repr(C)]
union V4l2FormatUnion {
    pix: V4l2PixFormat,
    raw_data: [u8; 200],
    _align: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct V4l2PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[derive(Debug, Clone)]
pub struct VirtualCameraConfig {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: 640,
            height: 480,
        }
    }
}

/// Writes YUYV frames into a v4l2loopback device.
pub struct VirtualCameraOutput {
    path: PathBuf,
    device: File,
    size: (u32, u32),
    dropped: u64,
}

impl VirtualCameraOutput {
    pub fn new(config: VirtualCameraConfig) -> Result<Self> {
        let path = config.device;
        if !path.exists() {
            return Err(anyhow!(
                "v4l2loopback device '{}' not found; load the v4l2loopback module first",
                path.display()
            ));
        }

        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| anyhow!("Failed to open v4l2loopback device '{}': {}", path.display(), e))?;

        let mut output = Self {
            path,
            device,
            size: (0, 0),
            dropped: 0,
        };
        output.set_format(config.width, config.height);
        info!(
            "Virtual camera ready on {} ({}x{} YUYV)",
            output.path.display(),
            config.width,
            config.height
        );
        Ok(output)
    }

    fn set_format(&mut self, width: u32, height: u32) {
        let pix = V4l2PixFormat {
            width,
            height,
            pixelformat: V4L2_PIX_FMT_YUYV,
            field: V4L2_FIELD_NONE,
            bytesperline: width * 2,
            sizeimage: width * height * 2,
            colorspace: V4L2_COLORSPACE_SRGB,
            priv_: 0,
            flags: 0,
            ycbcr_enc: 0,
            quantization: 0,
            xfer_func: 0,
        };
        let mut fmt = V4l2Format {
            type_: V4L2_BUF_TYPE_VIDEO_OUTPUT,
            fmt: V4l2FormatUnion { pix },
        };

        // SAFETY: `fmt` is a live, correctly laid out v4l2_format for the
        // duration of the call and the fd belongs to `self.device`.
        let rc = unsafe { libc::ioctl(self.device.as_raw_fd(), VIDIOC_S_FMT as _, &mut fmt) };
        if rc < 0 {
            warn!(
                "Failed to set v4l2 format {}x{}: {}",
                width,
                height,
                std::io::Error::last_os_error()
            );
        } else {
            debug!("Set v4l2 format to YUYV {}x{}", width, height);
        }
        self.size = (width, height);
    }
}

impl RenderSink for VirtualCameraOutput {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if (frame.width, frame.height) != self.size {
            info!("Reconfiguring virtual camera for {}x{}", frame.width, frame.height);
            self.set_format(frame.width, frame.height);
        }

        let yuyv = frame.to_yuyv()?;
        match self.device.write_all(&yuyv.data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // No consumer is reading; dropping is fine
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    debug!("v4l2loopback buffer full, {} frames dropped so far", self.dropped);
                }
                Ok(())
            }
            Err(e) => Err(anyhow!("Failed to write to {}: {}", self.path.display(), e)),
        }
    }
}

impl Drop for VirtualCameraOutput {
    fn drop(&mut self) {
        debug!("Virtual camera output on {} closed", self.path.display());
    }
}
