//! Effect selection and parameters, shareable across threads.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// The active background effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    /// Raw camera feed, no processing
    #[default]
    None,
    /// Full-frame blur with a soft-focus vignette
    Blur,
    /// Heuristic subject cut-out over a background image
    Image,
}

impl BackgroundMode {
    pub const ALL: [BackgroundMode; 3] = [BackgroundMode::None, BackgroundMode::Blur, BackgroundMode::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundMode::None => "none",
            BackgroundMode::Blur => "blur",
            BackgroundMode::Image => "image",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            BackgroundMode::None => 0,
            BackgroundMode::Blur => 1,
            BackgroundMode::Image => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BackgroundMode::Blur,
            2 => BackgroundMode::Image,
            _ => BackgroundMode::None,
        }
    }
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackgroundMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(BackgroundMode::None),
            "blur" => Ok(BackgroundMode::Blur),
            "image" | "virtual" => Ok(BackgroundMode::Image),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Blur radius in output pixels, always within [`BlurAmount::MIN`, `BlurAmount::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct BlurAmount(f32);

impl BlurAmount {
    pub const MIN: f32 = 1.0;
    pub const MAX: f32 = 50.0;
    pub const DEFAULT: BlurAmount = BlurAmount(10.0);

    /// Clamps any input into range. NaN maps to the minimum.
    pub fn clamped(amount: f64) -> Self {
        if amount.is_nan() {
            return BlurAmount(Self::MIN);
        }
        BlurAmount((amount as f32).clamp(Self::MIN, Self::MAX))
    }

    /// Whether `amount` is already inside `[MIN, MAX]`. False for NaN.
    pub fn in_range(amount: f64) -> bool {
        (Self::MIN as f64..=Self::MAX as f64).contains(&amount)
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for BlurAmount {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Lock-free storage for mode and blur amount. Each field is last-write-wins.
#[derive(Debug)]
pub(crate) struct EffectState {
    mode: AtomicU8,
    blur_bits: AtomicU32,
}

impl EffectState {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(BackgroundMode::default().to_u8()),
            blur_bits: AtomicU32::new(BlurAmount::DEFAULT.get().to_bits()),
        }
    }

    pub fn mode(&self) -> BackgroundMode {
        BackgroundMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: BackgroundMode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn blur_amount(&self) -> BlurAmount {
        BlurAmount(f32::from_bits(self.blur_bits.load(Ordering::Acquire)))
    }

    pub fn set_blur_amount(&self, amount: BlurAmount) {
        self.blur_bits.store(amount.get().to_bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_clamping() {
        assert_eq!(BlurAmount::clamped(0.0).get(), 1.0);
        assert_eq!(BlurAmount::clamped(999.0).get(), 50.0);
        assert_eq!(BlurAmount::clamped(15.0).get(), 15.0);
        assert_eq!(BlurAmount::clamped(-3.5).get(), 1.0);
        assert_eq!(BlurAmount::clamped(f64::NAN).get(), 1.0);
        assert_eq!(BlurAmount::clamped(f64::INFINITY).get(), 50.0);
    }

    #[test]
    fn test_in_range_ignores_f32_rounding() {
        // 15.3 has no exact f32 form but needs no clamping
        assert!(BlurAmount::in_range(15.3));
        assert!(BlurAmount::in_range(1.0));
        assert!(BlurAmount::in_range(50.0));
        assert!(!BlurAmount::in_range(0.0));
        assert!(!BlurAmount::in_range(999.0));
        assert!(!BlurAmount::in_range(f64::NAN));
        assert_eq!(BlurAmount::clamped(15.3).get(), 15.3_f32);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("blur".parse::<BackgroundMode>().unwrap(), BackgroundMode::Blur);
        assert_eq!(" Image ".parse::<BackgroundMode>().unwrap(), BackgroundMode::Image);
        assert_eq!("none".parse::<BackgroundMode>().unwrap(), BackgroundMode::None);
        assert!(matches!(
            "sepia".parse::<BackgroundMode>(),
            Err(ConfigError::UnknownMode(m)) if m == "sepia"
        ));
    }

    #[test]
    fn test_mode_round_trips_through_atomic_state() {
        let state = EffectState::new();
        assert_eq!(state.mode(), BackgroundMode::None);
        for mode in BackgroundMode::ALL {
            state.set_mode(mode);
            assert_eq!(state.mode(), mode);
        }
        assert_eq!(state.blur_amount(), BlurAmount::DEFAULT);
        state.set_blur_amount(BlurAmount::clamped(33.0));
        assert_eq!(state.blur_amount().get(), 33.0);
    }

    #[test]
    fn test_mode_serde_uses_lowercase_names() {
        let mode: BackgroundMode = serde_yaml::from_str("image").unwrap();
        assert_eq!(mode, BackgroundMode::Image);
        assert_eq!(serde_yaml::to_string(&BackgroundMode::Blur).unwrap().trim(), "blur");
    }
}
