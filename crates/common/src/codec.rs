//! Audio codec families, keyed by file extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Compressed audio family of a narrative audio segment.
///
/// Segments are classified purely by file extension; the decoder chosen for
/// a segment is the one registered for its family.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    /// AAC in an MPEG-4 container.
    M4a,
    Mp3,
    /// RIFF/WAVE with linear PCM data.
    Wav,
    /// Narrow-band cellular speech codec; recognised but never exported.
    Amr,
}

impl AudioCodec {
    /// All known families, in the order tracks of different families are laid out.
    pub const ALL: [AudioCodec; 4] = [Self::M4a, Self::Mp3, Self::Wav, Self::Amr];

    pub fn file_extensions(self) -> &'static [&'static str] {
        match self {
            Self::M4a => &["m4a", "aac"],
            Self::Mp3 => &["mp3"],
            Self::Wav => &["wav"],
            Self::Amr => &["amr", "3ga"],
        }
    }

    /// Classify a bare extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|codec| codec.file_extensions().contains(&ext.as_str()))
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether segments of this family can be decoded for movie export.
    pub fn is_exportable(self) -> bool {
        !matches!(self, Self::Amr)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::M4a => "AAC/M4A",
            Self::Mp3 => "MP3",
            Self::Wav => "WAV",
            Self::Amr => "AMR",
        }
    }
}
