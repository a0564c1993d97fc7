//! Multi-track audio assembly: narrative frames in, one mixed PCM track out.
//!
//! The assembler walks the frame timeline once per parallel track. Each track
//! takes at most one audio segment from every frame, decodes it, converts it
//! to the global format and writes it at the frame's start time, with silence
//! filling everything in between. Two or more tracks are then averaged into a
//! single mono stream.
//!
//! ```text
//! frames ──► rate selection ──► track 0: [silence][seg][silence]...
//!                               track 1: [silence][seg]...        ──► BlockMixer ──► combined.pcm
//!                               track N: ...
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use reel_common::{
    frame_start_times, total_duration_ms, Frame, PcmBuffer, PcmFormat, SampleOrder,
    SampleRateSetting, DEFAULT_SAMPLE_RATE,
};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::decoder::{DecodeOptions, Decoders};
use crate::error::AssemblyError;
use crate::mixer::BlockMixer;
use crate::resampler::resample_to_mono16;
use crate::temp::{create_temp_pcm, TrackFile};

/// The single PCM stream handed to the container writer.
///
/// Owns every temporary file produced during assembly; they are deleted when
/// this value is dropped (or [`close`](Self::close)d), which must happen only
/// after the writer has finished reading.
#[derive(Debug)]
pub struct CombinedAudioTrack {
    pcm: TempPath,
    format: PcmFormat,
    duration_ms: u64,
    track_count: usize,
    scratch: Vec<TempPath>,
}

impl CombinedAudioTrack {
    /// Raw 16-bit little-endian mono PCM.
    pub fn pcm_path(&self) -> &Path {
        &self.pcm
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Number of parallel tracks that were mixed into this one.
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Delete the PCM file and every intermediate file.
    pub fn close(self) -> io::Result<()> {
        for path in self.scratch {
            path.close()?;
        }
        self.pcm.close()
    }
}

/// Builds [`CombinedAudioTrack`]s (and the other layouts, see `layouts`)
/// from a frame list.
pub struct AudioAssembler<'a> {
    pub(crate) decoders: &'a Decoders,
    pub(crate) temp_dir: PathBuf,
    pub(crate) sample_rate: SampleRateSetting,
    mixer: BlockMixer,
}

/// Copy of `frames` with every frame's spanning item moved to the front of
/// its audio list, so it always lands on the first track.
pub fn spanning_first(frames: &[Frame]) -> Vec<Frame> {
    frames
        .iter()
        .cloned()
        .map(|mut frame| {
            if let Some(spanning) = frame.spanning.as_mut() {
                if spanning.index > 0 && spanning.index < frame.audio.len() {
                    let item = frame.audio.remove(spanning.index);
                    frame.audio.insert(0, item);
                    spanning.index = 0;
                }
            }
            frame
        })
        .collect()
}

/// Number of parallel tracks needed: the most export-compatible segments
/// attached to any one frame.
pub fn track_count(frames: &[Frame]) -> usize {
    frames
        .iter()
        .map(Frame::exportable_audio_count)
        .max()
        .unwrap_or(0)
}

/// Pick the next segment for a track from one frame.
///
/// Marks what it looks at as consumed. Returns `None` when the frame has
/// nothing left, or when the slot is taken by an inherited spanning item.
pub(crate) fn take_segment(frame: &Frame, consumed: &mut [bool]) -> Option<usize> {
    let inherited = frame.inherited_spanning_index();
    for (idx, segment) in frame.audio.iter().enumerate() {
        if consumed[idx] {
            continue;
        }
        consumed[idx] = true;
        if Some(idx) == inherited {
            return None;
        }
        if segment.is_exportable() {
            return Some(idx);
        }
    }
    None
}

impl<'a> AudioAssembler<'a> {
    pub fn new(decoders: &'a Decoders, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            decoders,
            temp_dir: temp_dir.into(),
            sample_rate: SampleRateSetting::Auto,
            mixer: BlockMixer::default(),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: SampleRateSetting) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Resolve the global sample rate.
    ///
    /// In automatic mode every compatible segment is probed and votes for its
    /// native rate with its declared duration; the rate carrying the most
    /// audio wins. Segments that cannot be probed do not vote.
    pub fn select_sample_rate(&self, frames: &[Frame]) -> u32 {
        if let SampleRateSetting::Fixed(rate) = self.sample_rate {
            return rate;
        }

        let mut totals: Vec<(u32, u64)> = Vec::new();
        for frame in frames {
            let inherited = frame.inherited_spanning_index();
            for (idx, segment) in frame.audio.iter().enumerate() {
                if Some(idx) == inherited || !segment.is_exportable() {
                    continue;
                }
                match self.decoders.probe(&segment.path) {
                    Ok(format) => match totals.iter_mut().find(|(r, _)| *r == format.sample_rate) {
                        Some((_, total)) => *total += segment.duration_ms,
                        None => totals.push((format.sample_rate, segment.duration_ms)),
                    },
                    Err(e) => {
                        debug!(path = %segment.path.display(), error = %e, "Probe failed, segment does not vote");
                    }
                }
            }
        }

        let chosen = totals
            .iter()
            .max_by_key(|(rate, total)| (*total, *rate))
            .map(|(rate, _)| *rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        debug!(?totals, chosen, "Selected sample rate");
        chosen
    }

    /// Decode a segment and bring it to `target`, falling back to the
    /// unconverted PCM if conversion fails.
    pub(crate) fn decode_to(
        &self,
        path: &Path,
        target: PcmFormat,
    ) -> Result<PcmBuffer, crate::error::DecodeError> {
        let pcm = self.decoders.decode(path, &DecodeOptions::mono())?;
        if pcm.format.same_rate_and_depth(&target) {
            return Ok(pcm.into_byte_order(SampleOrder::LittleEndian));
        }
        match resample_to_mono16(&pcm, target.sample_rate) {
            Ok(converted) => Ok(converted),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    from = %pcm.format,
                    to = %target,
                    error = %e,
                    "Resample failed, using unconverted audio"
                );
                let mut raw = pcm.into_byte_order(SampleOrder::LittleEndian);
                raw.format = target;
                Ok(raw)
            }
        }
    }

    /// Build one silence-padded track file per parallel lane.
    ///
    /// Lanes that never received a segment are dropped.
    fn build_tracks(
        &self,
        frames: &[Frame],
        format: PcmFormat,
    ) -> Result<Vec<TempPath>, AssemblyError> {
        let lanes = track_count(frames);
        let starts = frame_start_times(frames);
        let timeline_bytes = format.bytes_for_millis(total_duration_ms(frames));
        let mut consumed: Vec<Vec<bool>> = frames.iter().map(|f| vec![false; f.audio.len()]).collect();
        let mut tracks = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let mut track = TrackFile::create(&self.temp_dir, &format!("track-{lane}-"), 0)?;
            let mut segments_written = 0usize;

            for (f, frame) in frames.iter().enumerate() {
                let Some(idx) = take_segment(frame, &mut consumed[f]) else {
                    continue;
                };
                let segment = &frame.audio[idx];

                let mut pcm = match self.decode_to(&segment.path, format) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        warn!(
                            frame = frame.sequence_id,
                            path = %segment.path.display(),
                            error = %e,
                            "Audio segment could not be decoded, frame gets silence"
                        );
                        continue;
                    }
                };
                pcm.fit_to_millis(segment.duration_ms);

                // Negative gaps (previous segment overran) write nothing
                track.pad_to(format.bytes_for_millis(starts[f]))?;
                let room = timeline_bytes.saturating_sub(track.len());
                let keep = pcm.data.len().min(room as usize);
                track.write_pcm(&pcm.data[..keep])?;
                segments_written += 1;
            }

            if segments_written == 0 {
                debug!(lane, "Track received no audio, dropping");
                continue;
            }
            track.pad_to(timeline_bytes)?;
            debug!(lane, segments = segments_written, bytes = track.len(), "Built audio track");
            tracks.push(track.finish()?);
        }

        Ok(tracks)
    }

    fn mix_into<R, F>(&self, tracks: &[TempPath], output: &Path, mut open: F) -> io::Result<u64>
    where
        R: Read,
        F: FnMut(&Path) -> io::Result<R>,
    {
        let mut readers = tracks
            .iter()
            .map(|p| open(p))
            .collect::<io::Result<Vec<_>>>()?;
        let mut writer = BufWriter::new(File::create(output)?);
        let bytes = self.mixer.mix(&mut readers, &mut writer)?;
        writer.flush()?;
        Ok(bytes)
    }

    /// Reduce the built tracks to one, reading each through `open`.
    ///
    /// If mixing fails the partial output is deleted and the first track is
    /// used alone.
    fn combine<R, F>(
        &self,
        mut tracks: Vec<TempPath>,
        format: PcmFormat,
        open: F,
    ) -> Result<Option<CombinedAudioTrack>, AssemblyError>
    where
        R: Read,
        F: FnMut(&Path) -> io::Result<R>,
    {
        let track_count = tracks.len();
        let (pcm, scratch) = match track_count {
            0 => return Ok(None),
            1 => (tracks.remove(0), Vec::new()),
            n => {
                let mixed = create_temp_pcm(&self.temp_dir, "mixed-")?.into_temp_path();
                match self.mix_into(&tracks, &mixed, open) {
                    Ok(bytes) => {
                        debug!(tracks = n, bytes, "Mixed audio tracks");
                        (mixed, tracks)
                    }
                    Err(e) => {
                        warn!(error = %e, tracks = n, "Mixing failed, falling back to first track");
                        drop(mixed);
                        let first = tracks.remove(0);
                        (first, tracks)
                    }
                }
            }
        };

        let bytes = std::fs::metadata(&pcm)?.len();
        let duration_ms = format.millis_for_bytes(bytes);
        info!(
            sample_rate = format.sample_rate,
            tracks = track_count,
            duration_ms,
            bytes,
            "Assembled combined audio track"
        );

        Ok(Some(CombinedAudioTrack {
            pcm,
            format,
            duration_ms,
            track_count,
            scratch,
        }))
    }

    /// Assemble every frame's audio into one mono 16-bit track.
    ///
    /// Returns `Ok(None)` when no frame carries decodable audio.
    pub fn assemble(&self, frames: &[Frame]) -> Result<Option<CombinedAudioTrack>, AssemblyError> {
        let frames = spanning_first(frames);
        let rate = self.select_sample_rate(&frames);
        let format = PcmFormat::mono16(rate);

        let tracks = self.build_tracks(&frames, format)?;
        self.combine(tracks, format, |path| File::open(path).map(BufReader::new))
    }
}
