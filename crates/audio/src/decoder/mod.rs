//! PCM decoding strategies, selected by audio codec family.
//!
//! Each strategy implements [`PcmDecoder`] and always produces signed 16-bit
//! little-endian PCM. [`Decoders`] maps an [`AudioCodec`] (derived from the
//! file extension) to the strategy that handles it; families without a
//! registered strategy are reported as [`DecodeError::UnsupportedCodec`].

mod compressed;
mod wav;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use reel_common::{AudioCodec, PcmBuffer, PcmFormat, SampleOrder};

use crate::error::DecodeError;

pub use compressed::SymphoniaDecoder;
pub use wav::WavDecoder;

/// Channel layout requested from a decoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelMode {
    /// Keep the source channel count.
    #[default]
    Native,
    /// Average all channels into one.
    Mono,
    /// Two channels; a mono source is duplicated into both.
    Stereo,
}

/// Millisecond window of a source file to decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MillisRange {
    pub start_ms: u64,
    /// `None` decodes to the end of the file.
    pub end_ms: Option<u64>,
}

impl MillisRange {
    pub fn new(start_ms: u64, end_ms: Option<u64>) -> Self {
        Self { start_ms, end_ms }
    }

    /// Sample frame bounds of this range at `sample_rate`.
    fn frame_bounds(&self, sample_rate: u32) -> (usize, Option<usize>) {
        let to_frames = |ms: u64| (ms * u64::from(sample_rate) / 1000) as usize;
        (to_frames(self.start_ms), self.end_ms.map(to_frames))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub range: Option<MillisRange>,
    pub channels: ChannelMode,
}

impl DecodeOptions {
    /// Whole file, downmixed to mono (the assembler's request).
    pub fn mono() -> Self {
        Self {
            range: None,
            channels: ChannelMode::Mono,
        }
    }
}

/// A strategy that turns one compressed audio file into 16-bit PCM.
pub trait PcmDecoder: Send + Sync {
    /// Read just enough of the file to report its native format.
    fn probe(&self, path: &Path) -> Result<PcmFormat, DecodeError>;

    /// Decode the requested part of the file.
    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PcmBuffer, DecodeError>;
}

/// Registry of decoding strategies keyed by codec family.
#[derive(Clone, Default)]
pub struct Decoders {
    by_codec: HashMap<AudioCodec, Arc<dyn PcmDecoder>>,
}

impl Decoders {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Strategies for every export-compatible family.
    pub fn standard() -> Self {
        let compressed: Arc<dyn PcmDecoder> = Arc::new(SymphoniaDecoder::new());
        let mut decoders = Self::empty();
        decoders.register(AudioCodec::M4a, Arc::clone(&compressed));
        decoders.register(AudioCodec::Mp3, compressed);
        decoders.register(AudioCodec::Wav, Arc::new(WavDecoder::new()));
        decoders
    }

    /// Install (or replace) the strategy for `codec`.
    pub fn register(&mut self, codec: AudioCodec, decoder: Arc<dyn PcmDecoder>) {
        self.by_codec.insert(codec, decoder);
    }

    pub fn supports(&self, codec: AudioCodec) -> bool {
        self.by_codec.contains_key(&codec)
    }

    fn for_path(&self, path: &Path) -> Result<&Arc<dyn PcmDecoder>, DecodeError> {
        let codec = AudioCodec::from_path(path)
            .ok_or_else(|| DecodeError::UnknownExtension(path.to_path_buf()))?;
        self.by_codec
            .get(&codec)
            .ok_or(DecodeError::UnsupportedCodec(codec))
    }

    pub fn probe(&self, path: &Path) -> Result<PcmFormat, DecodeError> {
        self.for_path(path)?.probe(path)
    }

    pub fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PcmBuffer, DecodeError> {
        self.for_path(path)?.decode(path, options)
    }
}

impl std::fmt::Debug for Decoders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codecs: Vec<_> = self.by_codec.keys().collect();
        codecs.sort_by_key(|c| c.display_name());
        f.debug_struct("Decoders").field("codecs", &codecs).finish()
    }
}

/// Shape interleaved 16-bit samples into the requested window and layout.
///
/// Shared by every strategy so range and channel handling is identical
/// regardless of the source container.
pub(crate) fn finish_pcm(
    mut samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    options: &DecodeOptions,
) -> PcmBuffer {
    let ch = usize::from(channels.max(1));

    if let Some(range) = options.range {
        let total_frames = samples.len() / ch;
        let (start, end) = range.frame_bounds(sample_rate);
        let end = end.unwrap_or(total_frames).min(total_frames);
        let start = start.min(end);
        samples.truncate(end * ch);
        samples.drain(..start * ch);
    }

    let (samples, out_channels) = match options.channels {
        ChannelMode::Native => (samples, channels),
        ChannelMode::Mono => (downmix_to_mono(&samples, ch), 1),
        ChannelMode::Stereo => (to_stereo(&samples, ch), 2),
    };

    let format = PcmFormat::new(sample_rate, 16, out_channels, SampleOrder::LittleEndian);
    PcmBuffer::from_i16_samples(format, &samples)
}

fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    match channels {
        1 => samples.to_vec(),
        2 => samples
            .chunks_exact(2)
            .map(|f| (f[0] >> 1) + (f[1] >> 1) + (f[0] & f[1] & 1))
            .collect(),
        n => samples
            .chunks_exact(n)
            .map(|f| (f.iter().map(|&s| i32::from(s)).sum::<i32>() / n as i32) as i16)
            .collect(),
    }
}

fn to_stereo(samples: &[i16], channels: usize) -> Vec<i16> {
    match channels {
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples.chunks_exact(n).flat_map(|f| [f[0], f[1]]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_downmix_is_carry_safe() {
        let pcm = finish_pcm(vec![i16::MAX, i16::MAX, -3, -4], 8000, 2, &DecodeOptions::mono());
        assert_eq!(pcm.format.channels, 1);
        assert_eq!(pcm.to_i16_samples(), vec![i16::MAX, -4]);
    }

    #[test]
    fn stereo_duplicates_mono_source() {
        let options = DecodeOptions {
            range: None,
            channels: ChannelMode::Stereo,
        };
        let pcm = finish_pcm(vec![1, 2, 3], 8000, 1, &options);
        assert_eq!(pcm.format.channels, 2);
        assert_eq!(pcm.to_i16_samples(), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn range_selects_frames() {
        // 1000 Hz: one frame per millisecond
        let samples: Vec<i16> = (0..100).collect();
        let options = DecodeOptions {
            range: Some(MillisRange::new(10, Some(20))),
            channels: ChannelMode::Native,
        };
        let pcm = finish_pcm(samples, 1000, 1, &options);
        assert_eq!(pcm.to_i16_samples(), (10..20).collect::<Vec<i16>>());
    }

    #[test]
    fn range_past_end_is_empty() {
        let options = DecodeOptions {
            range: Some(MillisRange::new(500, None)),
            channels: ChannelMode::Native,
        };
        let pcm = finish_pcm(vec![0; 10], 1000, 1, &options);
        assert!(pcm.data.is_empty());
    }

    #[test]
    fn registry_rejects_unregistered_codecs() {
        let decoders = Decoders::standard();
        assert!(decoders.supports(AudioCodec::Wav));
        assert!(!decoders.supports(AudioCodec::Amr));
        assert!(matches!(
            decoders.probe(Path::new("clip.amr")),
            Err(DecodeError::UnsupportedCodec(AudioCodec::Amr))
        ));
        assert!(matches!(
            decoders.probe(Path::new("notes.txt")),
            Err(DecodeError::UnknownExtension(_))
        ));
    }

    struct Fixed;

    impl PcmDecoder for Fixed {
        fn probe(&self, _path: &Path) -> Result<PcmFormat, DecodeError> {
            Ok(PcmFormat::mono16(8000))
        }

        fn decode(&self, _path: &Path, options: &DecodeOptions) -> Result<PcmBuffer, DecodeError> {
            Ok(finish_pcm(vec![7; 8], 8000, 1, options))
        }
    }

    #[test]
    fn registered_strategy_is_used() {
        let mut decoders = Decoders::empty();
        decoders.register(AudioCodec::Amr, Arc::new(Fixed));
        let pcm = decoders
            .decode(Path::new("clip.3ga"), &DecodeOptions::default())
            .unwrap();
        assert_eq!(pcm.to_i16_samples(), vec![7; 8]);
    }
}
