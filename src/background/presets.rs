//! Built-in virtual backgrounds offered in the call settings panel.

/// Where a preset's pixels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetSource {
    /// A remote photo, loaded like any other background URL.
    Remote(&'static str),
    /// A diagonal two-colour gradient rendered locally.
    Gradient { from: [u8; 3], to: [u8; 3] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub source: PresetSource,
}

/// Size gradient presets are rendered at; scaled to the frame when drawn.
pub const GRADIENT_PRESET_SIZE: (u32, u32) = (800, 600);

pub const PRESETS: &[BackgroundPreset] = &[
    BackgroundPreset {
        id: "office",
        name: "Modern Office",
        source: PresetSource::Remote("https://images.unsplash.com/photo-1497366216548-37526070297c?w=800&q=80"),
    },
    BackgroundPreset {
        id: "mountain",
        name: "Mountain View",
        source: PresetSource::Remote("https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=800&q=80"),
    },
    BackgroundPreset {
        id: "beach",
        name: "Ocean Beach",
        source: PresetSource::Remote("https://images.unsplash.com/photo-1507525428034-b723cf961d3e?w=800&q=80"),
    },
    BackgroundPreset {
        id: "forest",
        name: "Forest Path",
        source: PresetSource::Remote("https://images.unsplash.com/photo-1441974231531-c6227db76b6e?w=800&q=80"),
    },
    BackgroundPreset {
        id: "purple-gradient",
        name: "Purple Gradient",
        source: PresetSource::Gradient {
            from: [0x66, 0x7e, 0xea],
            to: [0x76, 0x4b, 0xa2],
        },
    },
    BackgroundPreset {
        id: "blue-gradient",
        name: "Blue Gradient",
        source: PresetSource::Gradient {
            from: [0x3b, 0x82, 0xf6],
            to: [0x1d, 0x4e, 0xd8],
        },
    },
];

/// Looks a preset up by id, ignoring case.
pub fn find_preset(id: &str) -> Option<&'static BackgroundPreset> {
    PRESETS.iter().find(|p| p.id.eq_ignore_ascii_case(id.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_preset() {
        assert_eq!(find_preset("Office").map(|p| p.name), Some("Modern Office"));
        assert!(matches!(
            find_preset("blue-gradient").map(|p| p.source),
            Some(PresetSource::Gradient { .. })
        ));
        assert!(find_preset("space").is_none());
    }

    #[test]
    fn test_preset_ids_are_unique() {
        for (i, a) in PRESETS.iter().enumerate() {
            assert!(PRESETS[i + 1..].iter().all(|b| b.id != a.id));
        }
    }
}
