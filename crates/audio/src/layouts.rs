//! Alternative audio layouts that keep segments on separate movie tracks.
//!
//! - **Segmented**: one track per codec family and parallel slot. Segments
//!   are concatenated back to back in the track's PCM and positioned on the
//!   timeline with [`AudioPlacement`]s (written as an edit list).
//! - **Individual**: one track per segment, placed at its frame's start.
//!
//! Neither layout resamples to a global rate; a segmented track converts its
//! segments to the format of its first segment.

use std::io;
use std::path::Path;

use reel_common::{
    frame_start_times, AudioCodec, AudioPlacement, Frame, PcmBuffer, PcmFormat, SampleOrder,
};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::assembler::{spanning_first, take_segment, AudioAssembler};
use crate::decoder::{ChannelMode, DecodeOptions};
use crate::error::{AssemblyError, DecodeError};
use crate::resampler::resample;
use crate::temp::TrackFile;

/// A PCM file plus where its audio plays on the movie timeline.
#[derive(Debug)]
pub struct PlacedAudioTrack {
    pcm: TempPath,
    pub format: PcmFormat,
    pub codec: AudioCodec,
    pub placements: Vec<AudioPlacement>,
}

impl PlacedAudioTrack {
    pub fn pcm_path(&self) -> &Path {
        &self.pcm
    }

    pub fn close(self) -> io::Result<()> {
        self.pcm.close()
    }
}

/// Channel request for a segment whose native layout is `native`.
fn channel_mode_for(native: u16) -> ChannelMode {
    if native > 2 {
        ChannelMode::Mono
    } else {
        ChannelMode::Native
    }
}

/// Byte length of `length_ms` starting at `start_ms` of a stream, computed
/// from absolute positions so consecutive segments never drift.
fn span_bytes(format: &PcmFormat, start_ms: u64, length_ms: u64) -> usize {
    let end = format.bytes_for_millis(start_ms + length_ms);
    (end - format.bytes_for_millis(start_ms)) as usize
}

fn fit_bytes(pcm: &mut PcmBuffer, bytes: usize) {
    let silence = if pcm.format.bits_per_sample == 8 { 0x80 } else { 0 };
    pcm.data.resize(bytes, silence);
}

impl AudioAssembler<'_> {
    fn decode_native(&self, path: &Path) -> Result<PcmBuffer, DecodeError> {
        let probed = self.decoders.probe(path)?;
        let options = DecodeOptions {
            range: None,
            channels: channel_mode_for(probed.channels),
        };
        Ok(self
            .decoders
            .decode(path, &options)?
            .into_byte_order(SampleOrder::LittleEndian))
    }

    /// Decode `path` into exactly the format of an existing track.
    fn decode_matching(&self, path: &Path, target: PcmFormat) -> Result<PcmBuffer, DecodeError> {
        let channels = match target.channels {
            1 => ChannelMode::Mono,
            _ => ChannelMode::Stereo,
        };
        let options = DecodeOptions {
            range: None,
            channels,
        };
        let pcm = self
            .decoders
            .decode(path, &options)?
            .into_byte_order(SampleOrder::LittleEndian);
        if pcm.format.same_rate_and_depth(&target) {
            return Ok(pcm);
        }
        match resample(&pcm, target.sample_rate, target.bits_per_sample) {
            Ok(converted) => Ok(converted),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Resample failed, using unconverted audio");
                let mut raw = pcm;
                raw.format = target;
                Ok(raw)
            }
        }
    }

    /// One edit-listed track per codec family and parallel slot.
    pub fn assemble_segmented(&self, frames: &[Frame]) -> Result<Vec<PlacedAudioTrack>, AssemblyError> {
        let frames = spanning_first(frames);
        let starts = frame_start_times(&frames);
        let mut tracks = Vec::new();

        for codec in AudioCodec::ALL {
            if !codec.is_exportable() || !self.decoders.supports(codec) {
                continue;
            }

            // Per frame, only this family's segments (with the spanning marker
            // carried over when the spanning item belongs to it)
            let family: Vec<Frame> = frames
                .iter()
                .map(|frame| {
                    let mut only = frame.clone();
                    only.audio.retain(|a| a.codec() == Some(codec));
                    only.spanning = frame.spanning.filter(|s| {
                        frame.audio.get(s.index).and_then(|a| a.codec()) == Some(codec)
                    });
                    if let Some(s) = only.spanning.as_mut() {
                        s.index = frame.audio[..s.index]
                            .iter()
                            .filter(|a| a.codec() == Some(codec))
                            .count();
                    }
                    only
                })
                .collect();

            let slots = family.iter().map(|f| f.audio.len()).max().unwrap_or(0);
            let mut consumed: Vec<Vec<bool>> = family.iter().map(|f| vec![false; f.audio.len()]).collect();

            for slot in 0..slots {
                let mut track: Option<(TrackFile, PcmFormat)> = None;
                let mut placements = Vec::new();
                let mut media_ms = 0u64;

                for (f, frame) in family.iter().enumerate() {
                    let Some(idx) = take_segment(frame, &mut consumed[f]) else {
                        continue;
                    };
                    let segment = &frame.audio[idx];

                    let decoded = match &track {
                        None => self.decode_native(&segment.path),
                        Some((_, format)) => self.decode_matching(&segment.path, *format),
                    };
                    let mut pcm = match decoded {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            warn!(
                                frame = frame.sequence_id,
                                path = %segment.path.display(),
                                error = %e,
                                "Audio segment could not be decoded, skipping"
                            );
                            continue;
                        }
                    };

                    if track.is_none() {
                        let file = TrackFile::create(
                            &self.temp_dir,
                            &format!("{}-{slot}-", codec.file_extensions()[0]),
                            0,
                        )?;
                        track = Some((file, pcm.format));
                    }
                    let Some((file, format)) = track.as_mut() else {
                        continue;
                    };
                    let format = *format;

                    fit_bytes(&mut pcm, span_bytes(&format, media_ms, segment.duration_ms));
                    file.write_pcm(&pcm.data)?;
                    placements.push(AudioPlacement::new(starts[f], media_ms, segment.duration_ms));
                    media_ms += segment.duration_ms;
                }

                if let Some((file, format)) = track {
                    debug!(
                        codec = codec.display_name(),
                        slot,
                        segments = placements.len(),
                        format = %format,
                        "Built segmented audio track"
                    );
                    tracks.push(PlacedAudioTrack {
                        pcm: file.finish()?,
                        format,
                        codec,
                        placements,
                    });
                }
            }
        }

        info!(tracks = tracks.len(), "Assembled segmented audio");
        Ok(tracks)
    }

    /// One track per compatible segment, placed at its frame's start.
    pub fn assemble_individual(&self, frames: &[Frame]) -> Result<Vec<PlacedAudioTrack>, AssemblyError> {
        let starts = frame_start_times(frames);
        let mut tracks = Vec::new();

        for (f, frame) in frames.iter().enumerate() {
            let inherited = frame.inherited_spanning_index();
            for (idx, segment) in frame.audio.iter().enumerate() {
                if Some(idx) == inherited || !segment.is_exportable() {
                    continue;
                }
                let Some(codec) = segment.codec() else {
                    continue;
                };
                let pcm = match self.decode_native(&segment.path) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        warn!(
                            frame = frame.sequence_id,
                            path = %segment.path.display(),
                            error = %e,
                            "Audio segment could not be decoded, skipping"
                        );
                        continue;
                    }
                };

                let mut file = TrackFile::create(&self.temp_dir, &format!("segment-{f}-{idx}-"), 0)?;
                file.write_pcm(&pcm.data)?;
                tracks.push(PlacedAudioTrack {
                    pcm: file.finish()?,
                    format: pcm.format,
                    codec,
                    placements: vec![AudioPlacement::new(starts[f], 0, segment.duration_ms)],
                });
            }
        }

        info!(tracks = tracks.len(), "Assembled individual audio tracks");
        Ok(tracks)
    }
}
