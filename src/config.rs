//! YAML effect configuration with live reload.
//!
//! ```yaml
//! mode: image          # none | blur | image
//! blur_amount: 12      # clamped to [1, 50]
//! background: https://example.com/office.jpg
//! preset: mountain     # used when `background` is absent
//! ```

use crate::background::BackgroundLoad;
use crate::error::ConfigError;
use crate::processor::{BackgroundMode, ProcessorControls};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Effect settings as written in a config file or given on the command line.
/// Every field is optional; absent fields leave the processor untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Kept as text so one bad value only costs a warning, not the file
    pub mode: Option<String>,
    pub blur_amount: Option<f64>,
    pub background: Option<String>,
    pub preset: Option<String>,
}

impl EffectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Fields set in `overrides` win over ours.
    pub fn merged_with(self, overrides: EffectConfig) -> Self {
        Self {
            mode: overrides.mode.or(self.mode),
            blur_amount: overrides.blur_amount.or(self.blur_amount),
            background: overrides.background.or(self.background),
            preset: overrides.preset.or(self.preset),
        }
    }

    /// The configured mode, or `None` when absent or unrecognized.
    pub fn parsed_mode(&self) -> Option<BackgroundMode> {
        let raw = self.mode.as_deref()?;
        match raw.parse() {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("{}; keeping the current mode", e);
                None
            }
        }
    }

    /// Pushes whatever differs from `previous` into the processor. Returns
    /// the background load it started, if any.
    pub fn apply(&self, controls: &ProcessorControls, previous: Option<&EffectConfig>) -> Option<BackgroundLoad> {
        if previous.is_none_or(|p| p.mode != self.mode) {
            if let Some(mode) = self.parsed_mode() {
                controls.set_mode(mode);
            }
        }
        if previous.is_none_or(|p| p.blur_amount != self.blur_amount) {
            if let Some(amount) = self.blur_amount {
                controls.set_blur_amount(amount);
            }
        }

        let background_changed =
            previous.is_none_or(|p| p.background != self.background || p.preset != self.preset);
        if !background_changed {
            return None;
        }
        match (&self.background, &self.preset) {
            (Some(url), preset) => {
                if preset.is_some() {
                    warn!("Both background and preset configured; using background");
                }
                Some(controls.set_background_image(url))
            }
            (None, Some(id)) => Some(controls.set_background_preset(id)),
            (None, None) => None,
        }
    }
}

/// Watches an effect config file and re-reads it when it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    current: Option<EffectConfig>,
}

impl ConfigWatcher {
    /// Starts watching `path`. Returns `None` (after logging) when the
    /// platform watcher cannot be set up.
    pub fn new(path: &Path) -> Option<Self> {
        let (tx, rx) = channel();
        let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                return None;
            }
        };

        // Editors often replace the file instead of writing it in place, so
        // watch the directory and filter by name.
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            warn!("Failed to watch config file {:?}: {}", path, e);
            return None;
        }
        info!("Watching config file {:?} for changes", path);

        Some(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            rx,
            current: EffectConfig::load(path).ok(),
        })
    }

    pub fn current(&self) -> Option<&EffectConfig> {
        self.current.as_ref()
    }

    /// Drains pending file events. Returns `(previous, new)` when the file
    /// changed and parsed successfully.
    pub fn check_for_changes(&mut self) -> Option<(Option<EffectConfig>, EffectConfig)> {
        let file_name = self.path.file_name();
        let mut needs_reload = false;
        while let Ok(event) = self.rx.try_recv() {
            let Ok(event) = event else { continue };
            let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event.paths.iter().any(|p| p.file_name() == file_name);
            needs_reload |= relevant;
        }
        if !needs_reload {
            return None;
        }

        match EffectConfig::load(&self.path) {
            Ok(new) if Some(&new) == self.current.as_ref() => None,
            Ok(new) => {
                info!("Config file {:?} changed", self.path);
                let previous = self.current.replace(new.clone());
                Some((previous, new))
            }
            Err(e) => {
                error!("Ignoring invalid config {:?}: {}", self.path, e);
                None
            }
        }
    }
}
