//! The frame loop: source -> processor -> sink at a steady cadence.

use crate::background::BackgroundLoad;
use crate::capture::FrameSource;
use crate::config::ConfigWatcher;
use crate::error::LoadError;
use crate::output::RenderSink;
use crate::processor::VideoBackgroundProcessor;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Consecutive source failures tolerated before the loop gives up.
const MAX_SOURCE_FAILURES: u32 = 30;

/// Counters returned when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    /// Frames pulled from the source
    pub frames: u64,
    /// Frames replaced by processor output
    pub processed: u64,
    /// Frames forwarded raw
    pub passed_through: u64,
    pub source_errors: u64,
    pub sink_errors: u64,
}

/// Achieved frame rate and mean processing time, reported once per interval.
pub struct FrameMeter {
    frames: u32,
    busy: Duration,
    last_report: Instant,
    interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReport {
    pub fps: f32,
    pub avg_processing: Duration,
}

impl FrameMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            frames: 0,
            busy: Duration::ZERO,
            last_report: Instant::now(),
            interval,
        }
    }

    /// Records one frame. Returns a report when the interval has passed.
    pub fn record(&mut self, processing: Duration) -> Option<MeterReport> {
        self.frames += 1;
        self.busy += processing;
        let elapsed = self.last_report.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let report = MeterReport {
            fps: self.frames as f32 / elapsed.as_secs_f32(),
            avg_processing: self.busy / self.frames,
        };
        self.frames = 0;
        self.busy = Duration::ZERO;
        self.last_report = Instant::now();
        Some(report)
    }
}

impl Default for FrameMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Pulls frames, runs them through the processor and hands the result (or
/// the raw frame) to the sink.
pub struct FrameDriver<Src, Snk> {
    source: Src,
    sink: Snk,
    processor: VideoBackgroundProcessor,
    interval: Duration,
    max_frames: Option<u64>,
    running: Arc<AtomicBool>,
    watcher: Option<ConfigWatcher>,
    pending: Vec<BackgroundLoad>,
    meter: FrameMeter,
}

impl<Src: FrameSource, Snk: RenderSink> FrameDriver<Src, Snk> {
    pub fn new(source: Src, sink: Snk, processor: VideoBackgroundProcessor, fps: u32) -> Self {
        Self {
            source,
            sink,
            processor,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            max_frames: None,
            running: Arc::new(AtomicBool::new(true)),
            watcher: None,
            pending: Vec::new(),
            meter: FrameMeter::default(),
        }
    }

    /// Stops after `frames` frames.
    pub fn with_frame_limit(mut self, frames: Option<u64>) -> Self {
        self.max_frames = frames;
        self
    }

    /// Applies config file edits while running.
    pub fn with_config_watcher(mut self, watcher: Option<ConfigWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Tracks a background load so its outcome gets logged by the loop.
    pub fn track_load(&mut self, load: BackgroundLoad) {
        self.pending.push(load);
    }

    /// Clearing this flag ends the loop after the current frame.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn processor(&self) -> &VideoBackgroundProcessor {
        &self.processor
    }

    /// Runs until stopped, the sink closes, or the frame limit is hit.
    /// Disposes the processor before returning.
    pub fn run(mut self) -> Result<DriverStats> {
        let mut stats = DriverStats::default();
        let mut consecutive_failures = 0u32;
        info!("Frame loop started at {:.1} fps", 1.0 / self.interval.as_secs_f64());

        while self.running.load(Ordering::SeqCst) && self.sink.is_open() {
            if self.max_frames.is_some_and(|max| stats.frames >= max) {
                debug!("Frame limit reached");
                break;
            }
            let tick = Instant::now();
            self.poll_pending_loads();
            self.poll_config();

            let frame = match self.source.next_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(e) => {
                    stats.source_errors += 1;
                    consecutive_failures += 1;
                    warn!("Failed to read frame: {}", e);
                    if consecutive_failures >= MAX_SOURCE_FAILURES {
                        self.processor.dispose();
                        return Err(anyhow!("Frame source failed {} times in a row: {}", consecutive_failures, e));
                    }
                    thread::sleep(self.interval);
                    continue;
                }
            };
            stats.frames += 1;

            let started = Instant::now();
            let output = self.processor.process_frame(&frame);
            let processing = started.elapsed();
            let shown = match output {
                Some(processed) => {
                    stats.processed += 1;
                    processed
                }
                None => {
                    stats.passed_through += 1;
                    &frame
                }
            };
            if let Err(e) = self.sink.write_frame(shown) {
                stats.sink_errors += 1;
                error!("Output error: {}", e);
            }

            if processing > self.interval {
                warn!(
                    "Frame processing took {:?}, over the {:?} frame interval",
                    processing, self.interval
                );
            }
            if let Some(report) = self.meter.record(processing) {
                debug!(
                    "[Perf] {:.2} FPS, avg processing {:?} ({}x{})",
                    report.fps, report.avg_processing, frame.width, frame.height
                );
            }

            let elapsed = tick.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }

        self.processor.dispose();
        info!(
            "Frame loop stopped: {} frames, {} processed, {} passed through",
            stats.frames, stats.processed, stats.passed_through
        );
        Ok(stats)
    }

    fn poll_pending_loads(&mut self) {
        self.pending.retain_mut(|load| match load.try_result() {
            None => true,
            Some(Ok(())) => {
                debug!("Background load finished");
                false
            }
            Some(Err(LoadError::Superseded)) => {
                debug!("Background load superseded by a newer one");
                false
            }
            Some(Err(e)) => {
                debug!("Background load failed: {}", e);
                false
            }
        });
    }

    fn poll_config(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        if let Some((previous, current)) = watcher.check_for_changes() {
            if let Some(load) = current.apply(&self.processor.controls(), previous.as_ref()) {
                self.pending.push(load);
            }
        }
    }
}
