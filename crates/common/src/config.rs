//! Export settings and the narrative manifest.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Frame;

/// Sample rate of the exported audio.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SampleRateRepr", into = "SampleRateRepr")]
pub enum SampleRateSetting {
    /// Pick the rate covering the most audio duration across all segments.
    #[default]
    Auto,
    /// Resample everything to this rate (Hz).
    Fixed(u32),
}

/// JSON shape of [`SampleRateSetting`]: `"auto"` or a number of Hz.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum SampleRateRepr {
    Hz(u32),
    Named(String),
}

impl TryFrom<SampleRateRepr> for SampleRateSetting {
    type Error = String;

    fn try_from(repr: SampleRateRepr) -> Result<Self, Self::Error> {
        match repr {
            SampleRateRepr::Hz(hz) => Ok(Self::Fixed(hz)),
            SampleRateRepr::Named(name) if name.eq_ignore_ascii_case("auto") => Ok(Self::Auto),
            SampleRateRepr::Named(other) => Err(format!("unknown sample rate `{other}`")),
        }
    }
}

impl From<SampleRateSetting> for SampleRateRepr {
    fn from(setting: SampleRateSetting) -> Self {
        match setting {
            SampleRateSetting::Auto => Self::Named("auto".to_string()),
            SampleRateSetting::Fixed(hz) => Self::Hz(hz),
        }
    }
}

/// How narrative audio is laid out in the exported movie.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioLayout {
    /// Decode, resample and mix everything into one mono track.
    #[default]
    Combined,
    /// One edit-listed track per codec family and parallel slot.
    Segmented,
    /// One track per audio segment.
    Individual,
}

/// Lowest and highest accepted fixed sample rates (Hz).
pub const MIN_SAMPLE_RATE: u32 = 4_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Fallback rate when automatic selection finds no probe-able audio.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Settings for one movie export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output frame width in pixels.
    pub width: u32,
    /// Output frame height in pixels.
    pub height: u32,
    /// JPEG quality, 1..=100.
    pub image_quality: u8,
    pub background_colour: [u8; 3],
    pub text_colour_with_image: [u8; 3],
    pub text_colour_no_image: [u8; 3],
    /// RGBA, alpha used for the band behind text drawn over images.
    pub text_background_colour: [u8; 4],
    pub sample_rate: SampleRateSetting,
    pub audio_layout: AudioLayout,
    /// Directory for intermediate PCM files (default: next to the output).
    pub temp_dir: Option<PathBuf>,
    /// Drain all buffered audio at close instead of stopping with the video.
    pub write_remaining_audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            image_quality: 85,
            background_colour: [0, 0, 0],
            text_colour_with_image: [255, 255, 255],
            text_colour_no_image: [255, 255, 255],
            text_background_colour: [0, 0, 0, 128],
            sample_rate: SampleRateSetting::Auto,
            audio_layout: AudioLayout::Combined,
            temp_dir: None,
            write_remaining_audio: true,
        }
    }
}

impl ExportSettings {
    /// Check that the settings describe a writable movie.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "width/height",
                reason: format!("{}x{} has a zero dimension", self.width, self.height),
            });
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::InvalidSetting {
                field: "width/height",
                reason: format!("{}x{} must be even", self.width, self.height),
            });
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(ConfigError::InvalidSetting {
                field: "image_quality",
                reason: format!("{} is outside 1..=100", self.image_quality),
            });
        }
        if let SampleRateSetting::Fixed(hz) = self.sample_rate {
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&hz) {
                return Err(ConfigError::InvalidSetting {
                    field: "sample_rate",
                    reason: format!("{hz} Hz is outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}"),
                });
            }
        }
        Ok(())
    }
}

/// A complete export request: settings plus the ordered frame list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    #[serde(default)]
    pub settings: ExportSettings,
    pub frames: Vec<Frame>,
}

impl Narrative {
    /// Parse a manifest from JSON text. Paths are left as written.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let narrative: Narrative = serde_json::from_str(json)?;
        narrative.validate()?;
        Ok(narrative)
    }

    /// Load a manifest file, resolving relative media paths against its directory.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut narrative = Self::from_json(&json)?;
        if let Some(base) = path.parent() {
            for frame in &mut narrative.frames {
                frame.resolve_paths(base);
            }
        }
        debug!(
            path = %path.display(),
            frames = narrative.frames.len(),
            "Loaded narrative manifest"
        );
        Ok(narrative)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.settings.validate()?;
        for frame in &self.frames {
            if let Some(spanning) = frame.spanning {
                if spanning.index >= frame.audio.len() {
                    return Err(ConfigError::InvalidFrame {
                        sequence_id: frame.sequence_id,
                        reason: format!(
                            "spanning index {} out of range ({} audio items)",
                            spanning.index,
                            frame.audio.len()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
