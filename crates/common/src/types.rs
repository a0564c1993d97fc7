//! Narrative timeline types: frames and the audio segments attached to them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::AudioCodec;

/// One audio clip attached to a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Source file; its extension selects the decoder.
    pub path: PathBuf,
    /// Declared playback duration in milliseconds.
    pub duration_ms: u64,
}

impl AudioSegment {
    pub fn new(path: impl Into<PathBuf>, duration_ms: u64) -> Self {
        Self {
            path: path.into(),
            duration_ms,
        }
    }

    pub fn codec(&self) -> Option<AudioCodec> {
        AudioCodec::from_path(&self.path)
    }

    /// Whether this segment can take part in a movie export.
    pub fn is_exportable(&self) -> bool {
        self.codec().is_some_and(AudioCodec::is_exportable)
    }
}

/// Marks the one audio item of a frame that continues across later frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanningAudio {
    /// Index into the frame's `audio` list.
    pub index: usize,
    /// `true` on the frame where the item starts; `false` on frames that inherit it.
    pub root: bool,
}

/// A single timed frame of a narrative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub sequence_id: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio: Vec<AudioSegment>,
    #[serde(default)]
    pub spanning: Option<SpanningAudio>,
}

impl Frame {
    pub fn new(sequence_id: u32, duration_ms: u64) -> Self {
        Self {
            sequence_id,
            duration_ms,
            ..Default::default()
        }
    }

    pub fn with_audio(mut self, segment: AudioSegment) -> Self {
        self.audio.push(segment);
        self
    }

    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_spanning(mut self, index: usize, root: bool) -> Self {
        self.spanning = Some(SpanningAudio { index, root });
        self
    }

    /// Index of an inherited (non-root) spanning item, if this frame carries one.
    pub fn inherited_spanning_index(&self) -> Option<usize> {
        self.spanning
            .filter(|s| !s.root && s.index < self.audio.len())
            .map(|s| s.index)
    }

    /// Number of audio items on this frame that are export-compatible.
    pub fn exportable_audio_count(&self) -> usize {
        self.audio.iter().filter(|a| a.is_exportable()).count()
    }

    /// Resolve relative image and audio paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(image) = self.image.as_mut() {
            if image.is_relative() {
                *image = base.join(&*image);
            }
        }
        for segment in &mut self.audio {
            if segment.path.is_relative() {
                segment.path = base.join(&segment.path);
            }
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame #{} ({} ms, {} audio)",
            self.sequence_id,
            self.duration_ms,
            self.audio.len()
        )
    }
}

/// Where one stretch of a track's audio sits on the movie timeline.
///
/// `start_ms` and `length_ms` address the track's own media (its PCM file);
/// `offset_ms` is the movie time at which that stretch begins to play.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPlacement {
    pub offset_ms: u64,
    pub start_ms: u64,
    pub length_ms: u64,
}

impl AudioPlacement {
    pub fn new(offset_ms: u64, start_ms: u64, length_ms: u64) -> Self {
        Self {
            offset_ms,
            start_ms,
            length_ms,
        }
    }

    /// Movie time at which this stretch stops playing.
    pub fn end_ms(&self) -> u64 {
        self.offset_ms + self.length_ms
    }
}

/// Start time in milliseconds of every frame, in timeline order.
pub fn frame_start_times(frames: &[Frame]) -> Vec<u64> {
    let mut start = 0u64;
    frames
        .iter()
        .map(|frame| {
            let this = start;
            start += frame.duration_ms;
            this
        })
        .collect()
}

/// Total timeline duration in milliseconds.
pub fn total_duration_ms(frames: &[Frame]) -> u64 {
    frames.iter().map(|f| f.duration_ms).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_times_accumulate() {
        let frames = vec![Frame::new(0, 1000), Frame::new(1, 2000), Frame::new(2, 1000)];
        assert_eq!(frame_start_times(&frames), vec![0, 1000, 3000]);
        assert_eq!(total_duration_ms(&frames), 4000);
    }

    #[test]
    fn placement_end() {
        assert_eq!(AudioPlacement::new(1000, 250, 1500).end_ms(), 2500);
    }

    #[test]
    fn exportable_count_skips_unknown_and_amr() {
        let frame = Frame::new(0, 1000)
            .with_audio(AudioSegment::new("a.m4a", 500))
            .with_audio(AudioSegment::new("b.amr", 500))
            .with_audio(AudioSegment::new("c.txt", 500))
            .with_audio(AudioSegment::new("d.wav", 500));
        assert_eq!(frame.exportable_audio_count(), 2);
    }

    #[test]
    fn inherited_spanning_index() {
        let root = Frame::new(0, 1000)
            .with_audio(AudioSegment::new("long.mp3", 3000))
            .with_spanning(0, true);
        assert_eq!(root.inherited_spanning_index(), None);

        let inherited = Frame::new(1, 1000)
            .with_audio(AudioSegment::new("long.mp3", 3000))
            .with_spanning(0, false);
        assert_eq!(inherited.inherited_spanning_index(), Some(0));

        let dangling = Frame::new(2, 1000).with_spanning(3, false);
        assert_eq!(dangling.inherited_spanning_index(), None);
    }

    #[test]
    fn resolve_relative_paths() {
        let mut frame = Frame::new(0, 1000)
            .with_image("img/a.jpg")
            .with_audio(AudioSegment::new("/abs/b.wav", 100))
            .with_audio(AudioSegment::new("c.wav", 100));
        frame.resolve_paths(Path::new("/story"));
        assert_eq!(frame.image, Some(PathBuf::from("/story/img/a.jpg")));
        assert_eq!(frame.audio[0].path, PathBuf::from("/abs/b.wav"));
        assert_eq!(frame.audio[1].path, PathBuf::from("/story/c.wav"));
    }

    #[test]
    fn frame_deserializes_with_defaults() {
        let json = r#"{ "sequence_id": 4, "duration_ms": 2500 }"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.sequence_id, 4);
        assert!(frame.audio.is_empty());
        assert!(frame.spanning.is_none());
    }
}
