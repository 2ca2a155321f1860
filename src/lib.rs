//! Backdrop: real-time video background compositor
//!
//! Blurs or replaces the background of a live camera feed frame by frame on
//! the CPU, and drives the result into a preview window, a virtual camera or
//! PNG snapshots.

pub mod background;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod output;
pub mod processor;
pub mod surface;

pub use background::{BackgroundImage, BackgroundLoad};
pub use error::{ConfigError, FrameError, LoadError};
pub use frame::{PixelFormat, VideoFrame};
pub use processor::{BackgroundMode, BlurAmount, ProcessorControls, VideoBackgroundProcessor};
