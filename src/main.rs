//! Backdrop CLI: blur or replace the background of a live camera feed.

use anyhow::{anyhow, Result};
use backdrop::background::PRESETS;
use backdrop::capture::{CaptureConfig, FrameSource, NokhwaCapture, StillImageSource};
use backdrop::config::{ConfigWatcher, EffectConfig};
use backdrop::driver::FrameDriver;
use backdrop::output::{PreviewWindow, RenderSink, SnapshotSink};
#[cfg(target_os = "linux")]
use backdrop::output::{VirtualCameraConfig, VirtualCameraOutput};
use backdrop::processor::VideoBackgroundProcessor;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Where processed frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Preview window (default)
    Window,
    /// v4l2loopback device (Linux only)
    #[cfg(target_os = "linux")]
    VirtualCamera,
    /// PNG files in --snapshot-dir
    Snapshots,
}

/// Real-time background blur and replacement for webcams.
#[derive(Parser, Debug)]
#[command(name = "backdrop")]
#[command(about = "Blur or replace your webcam background in real time")]
struct Args {
    /// Camera device index
    #[arg(short, long, default_value = "0")]
    input: u32,

    /// Use a still image instead of a camera
    #[arg(long, conflicts_with = "input")]
    still: Option<PathBuf>,

    /// Frame width
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height
    #[arg(long, default_value = "480")]
    height: u32,

    /// Target frames per second
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Effect: none, blur or image
    #[arg(short, long)]
    mode: Option<String>,

    /// Blur radius in pixels, clamped to 1..=50
    #[arg(short, long)]
    blur: Option<f64>,

    /// Background image URL, data URL or file path (image mode)
    #[arg(long)]
    background: Option<String>,

    /// Built-in background preset (see --list-presets)
    #[arg(long)]
    preset: Option<String>,

    /// YAML effect config, reloaded when it changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output mode
    #[arg(long, value_enum, default_value = "window")]
    output: OutputMode,

    /// v4l2loopback device for --output virtual-camera
    #[cfg(target_os = "linux")]
    #[arg(long, default_value = "/dev/video10")]
    device: PathBuf,

    /// Directory for --output snapshots
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// Write every Nth frame in snapshot mode
    #[arg(long, default_value = "30")]
    snapshot_every: u64,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// List background presets and exit
    #[arg(long)]
    list_presets: bool,
}

impl Args {
    fn effect_overrides(&self) -> EffectConfig {
        EffectConfig {
            mode: self.mode.clone(),
            blur_amount: self.blur,
            background: self.background.clone(),
            preset: self.preset.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        for device in NokhwaCapture::list_devices()? {
            println!("  [{}] {}", device.index, device.name);
        }
        return Ok(());
    }
    if args.list_presets {
        println!("Background presets:");
        for preset in PRESETS {
            println!("  {:<16} {}", preset.id, preset.name);
        }
        return Ok(());
    }

    info!("Starting Backdrop...");

    let file_config = match &args.config {
        Some(path) => EffectConfig::load(path).map_err(|e| anyhow!("{:?}: {}", path, e))?,
        None => EffectConfig::default(),
    };
    let watcher = args.config.as_deref().and_then(ConfigWatcher::new);

    let processor = VideoBackgroundProcessor::new();
    let initial_load = file_config
        .merged_with(args.effect_overrides())
        .apply(&processor.controls(), None);

    let source = open_source(&args)?;
    let (width, height) = source.frame_size();
    let sink = open_sink(&args, width, height)?;

    let mut driver = FrameDriver::new(source, sink, processor, args.fps)
        .with_frame_limit(args.frames)
        .with_config_watcher(watcher);
    if let Some(load) = initial_load {
        driver.track_load(load);
    }

    let running = driver.running_flag();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        running.store(false, Ordering::SeqCst);
    })?;

    let stats = driver.run()?;
    info!(
        "Done: {} frames ({} processed, {} passed through, {} source errors, {} output errors)",
        stats.frames, stats.processed, stats.passed_through, stats.source_errors, stats.sink_errors
    );
    Ok(())
}

fn open_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = &args.still {
        return Ok(Box::new(StillImageSource::open(path, args.fps)?));
    }

    let config = CaptureConfig {
        device_index: args.input,
        width: args.width,
        height: args.height,
        fps: args.fps,
    };
    info!("Opening camera device {}...", args.input);
    Ok(Box::new(NokhwaCapture::open(&config)?))
}

fn open_sink(args: &Args, width: u32, height: u32) -> Result<Box<dyn RenderSink>> {
    Ok(match args.output {
        OutputMode::Window => Box::new(PreviewWindow::new("Backdrop", width, height)?),
        #[cfg(target_os = "linux")]
        OutputMode::VirtualCamera => Box::new(VirtualCameraOutput::new(VirtualCameraConfig {
            device: args.device.clone(),
            width,
            height,
        })?),
        OutputMode::Snapshots => Box::new(SnapshotSink::new(&args.snapshot_dir, args.snapshot_every)?),
    })
}
