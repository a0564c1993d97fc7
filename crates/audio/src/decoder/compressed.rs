//! AAC (MPEG-4 container) and MP3 decoding via Symphonia.

use std::fs::File;
use std::path::Path;

use reel_common::{PcmBuffer, PcmFormat, SampleOrder};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::{finish_pcm, DecodeOptions, PcmDecoder};
use crate::error::DecodeError;

/// Decoder for the compressed families Symphonia handles.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// An opened source: container reader plus the selected audio track.
struct OpenedSource {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

fn open(path: &Path) -> Result<OpenedSource, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("{e}")))?;

    let reader = probed.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Codec("No sample rate in codec params".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| DecodeError::Codec("No channel info in codec params".to_string()))?;

    Ok(OpenedSource {
        track_id: track.id,
        reader,
        sample_rate,
        channels,
    })
}

fn make_decoder(source: &OpenedSource) -> Result<Box<dyn Decoder>, DecodeError> {
    let track = source
        .reader
        .tracks()
        .iter()
        .find(|t| t.id == source.track_id)
        .ok_or(DecodeError::NoAudioTrack)?;
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("Codec init failed: {e}")))
}

impl PcmDecoder for SymphoniaDecoder {
    fn probe(&self, path: &Path) -> Result<PcmFormat, DecodeError> {
        let source = open(path)?;
        Ok(PcmFormat::new(
            source.sample_rate,
            16,
            source.channels,
            SampleOrder::LittleEndian,
        ))
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PcmBuffer, DecodeError> {
        let mut source = open(path)?;
        let mut decoder = make_decoder(&source)?;

        let ch = usize::from(source.channels.max(1));
        // Stop decoding once the requested window is covered
        let frame_limit = options
            .range
            .and_then(|r| r.end_ms)
            .map(|end| (end * u64::from(source.sample_rate) / 1000) as usize);

        let mut samples: Vec<i16> = Vec::new();

        loop {
            if frame_limit.is_some_and(|limit| samples.len() / ch >= limit) {
                break;
            }

            let packet = match source.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Codec(format!("{e}"))),
            };

            if packet.track_id() != source.track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!(path = %path.display(), error = %msg, "Skipping corrupted audio packet");
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(format!("{e}"))),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        debug!(
            path = %path.display(),
            sample_rate = source.sample_rate,
            channels = source.channels,
            samples = samples.len(),
            "Decoded compressed audio"
        );

        Ok(finish_pcm(
            samples,
            source.sample_rate,
            source.channels,
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_nonexistent_file() {
        let err = SymphoniaDecoder::new()
            .probe(Path::new("/nonexistent/file.mp3"))
            .unwrap_err();
        match err {
            DecodeError::FileOpen { path, .. } => {
                assert!(path.to_string_lossy().contains("nonexistent"))
            }
            other => panic!("Expected FileOpen error, got: {other}"),
        }
    }

    #[test]
    fn garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.m4a");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();
        let err = SymphoniaDecoder::new().probe(&path).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }
}
