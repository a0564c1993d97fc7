//! `MovWriter`: streaming QuickTime writer with JPEG video and PCM audio.
//!
//! File layout:
//!
//! ```text
//! [ftyp 32 bytes][mdat: 16-byte header, interleaved chunks ...][moov]
//! ```
//!
//! Video frames are appended as they arrive. Every time the pending video
//! chunk reaches one second, the chunk is closed and the same span of audio
//! is pulled from each audio track and written right after it, so audio and
//! video stay interleaved at roughly one-second granularity. Each audio
//! track is primed with one second of sound when it is added.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use reel_common::{swap_byte_pairs, AudioPlacement, PcmFormat, SampleOrder};

use crate::atoms::{fill_large_box_size, large_box_size_placeholder, rescale, Atom, MOVIE_TIMESCALE};
use crate::error::{MuxError, MuxResult};
use crate::mov::{self, EditEntry};
use crate::sample_table::{SampleSizes, SampleTable};

/// Audio written per interleave step and when a track is primed (ms).
const AUDIO_STEP_MS: u64 = 1000;

const VIDEO_TRACK_ID: u32 = 1;

/// One encoded video frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// A PCM source for one audio track.
pub struct AudioInput {
    reader: Box<dyn Read + Send>,
    format: PcmFormat,
}

impl AudioInput {
    pub fn from_reader(reader: impl Read + Send + 'static, format: PcmFormat) -> Self {
        Self {
            reader: Box::new(reader),
            format,
        }
    }

    /// Open a raw PCM file (no header) described by `format`.
    pub fn from_file(path: &Path, format: PcmFormat) -> MuxResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), format))
    }

    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl std::fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioInput")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Zip parallel offset/start/length lists (ms) into placements.
pub fn placements_from_parts(
    offsets: &[u64],
    starts: &[u64],
    lengths: &[u64],
) -> MuxResult<Vec<AudioPlacement>> {
    if offsets.len() != starts.len() || offsets.len() != lengths.len() {
        return Err(MuxError::InvalidConfig(format!(
            "placement lists differ in length ({} offsets, {} starts, {} lengths)",
            offsets.len(),
            starts.len(),
            lengths.len()
        )));
    }
    Ok(offsets
        .iter()
        .zip(starts)
        .zip(lengths)
        .map(|((&offset, &start), &length)| AudioPlacement::new(offset, start, length))
        .collect())
}

/// The `mdat` byte stream, with its write position tracked in memory so
/// buffered writers are never flushed just to learn an offset.
struct MediaData<W> {
    writer: W,
    position: u64,
}

impl<W: Write> MediaData<W> {
    /// Append bytes and return the offset they were written at.
    fn append(&mut self, data: &[u8]) -> MuxResult<u64> {
        let offset = self.position;
        self.writer.write_all(data)?;
        self.position += data.len() as u64;
        Ok(offset)
    }
}

/// How an audio track's media maps onto the movie timeline.
#[derive(Clone, Debug)]
enum Arrangement {
    /// Silence was prepended to the stream; it plays from movie time zero.
    SilencePrefixed,
    /// An edit list skips and plays stretches of the media.
    Edited {
        placements: Vec<AudioPlacement>,
        /// The single placement's length is whatever was written.
        open_ended: bool,
    },
}

struct AudioTrack {
    input: Box<dyn Read + Send>,
    format: PcmFormat,
    arrangement: Arrangement,
    table: SampleTable,
    total_samples: u64,
    swap_bytes: bool,
    exhausted: bool,
}

impl AudioTrack {
    fn new(input: AudioInput, arrangement: Arrangement) -> Self {
        let format = input.format;
        Self {
            input: input.reader,
            swap_bytes: format.bits_per_sample > 8 && format.byte_order == SampleOrder::LittleEndian,
            format,
            arrangement,
            table: SampleTable::new(),
            total_samples: 0,
            exhausted: false,
        }
    }

    /// Write up to `millis` of audio as one chunk. Returns whether anything was written.
    fn write_audio<W: Write>(
        &mut self,
        millis: u64,
        mdat: &mut MediaData<W>,
        buffer: &mut Vec<u8>,
    ) -> MuxResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let frame_size = u64::from(self.format.frame_size());
        let samples = rescale(millis, MOVIE_TIMESCALE, self.format.sample_rate);
        let mut wanted = samples * frame_size;
        if wanted % 2 == 1 {
            wanted += 1;
        }

        buffer.clear();
        let read = (&mut self.input).take(wanted).read_to_end(buffer)?;
        let usable = read as u64 - read as u64 % frame_size;
        if (read as u64) < wanted {
            self.exhausted = true;
        }
        if usable == 0 {
            return Ok(false);
        }

        let chunk = &mut buffer[..usable as usize];
        if self.swap_bytes {
            swap_byte_pairs(chunk);
        }
        let offset = mdat.append(chunk)?;
        let chunk_samples = usable / frame_size;
        self.table.chunks.push_chunk(chunk_samples as u32);
        self.table.offsets.push(offset);
        self.total_samples += chunk_samples;
        Ok(true)
    }

    /// Written media length in the movie timescale.
    fn written_millis(&self) -> u64 {
        rescale(self.total_samples, self.format.sample_rate, MOVIE_TIMESCALE)
    }

    fn edit_entries(&self) -> Option<Vec<EditEntry>> {
        let Arrangement::Edited {
            placements,
            open_ended,
        } = &self.arrangement
        else {
            return None;
        };
        let mut entries = Vec::with_capacity(placements.len() * 2);
        let mut previous_end = 0u64;
        for placement in placements {
            let length = if *open_ended {
                self.written_millis()
            } else {
                placement.length_ms
            };
            if placement.offset_ms > previous_end {
                entries.push(EditEntry::skip((placement.offset_ms - previous_end) as u32));
            }
            let media_time = rescale(placement.start_ms, MOVIE_TIMESCALE, self.format.sample_rate);
            entries.push(EditEntry::play(length as u32, media_time as i32));
            previous_end = placement.offset_ms + length;
        }
        Some(entries)
    }

    /// Presented duration in the movie timescale.
    fn duration(&self) -> u64 {
        match &self.arrangement {
            Arrangement::SilencePrefixed => self.written_millis(),
            Arrangement::Edited {
                placements,
                open_ended,
            } => match placements.last() {
                Some(last) if *open_ended => last.offset_ms + self.written_millis(),
                Some(last) => last.end_ms(),
                None => 0,
            },
        }
    }

    fn into_atom(mut self, track_id: u32) -> Atom {
        let total = u32::try_from(self.total_samples).unwrap_or(u32::MAX);
        self.table.durations.add_run(total, 1);
        self.table.sizes = SampleSizes::uniform(1, total);
        let edits = self.edit_entries();
        let duration = self.duration();
        let format = PcmFormat {
            byte_order: SampleOrder::BigEndian,
            ..self.format
        };
        mov::audio_trak(track_id, &format, duration, edits.as_deref(), &self.table)
    }
}

#[derive(Default)]
struct VideoTrack {
    size: Option<(u32, u32)>,
    table: SampleTable,
    frames: usize,
    /// (first sample offset, samples, duration) of the chunk being filled.
    pending: Option<(u64, u32, u64)>,
}

impl VideoTrack {
    fn is_empty(&self) -> bool {
        self.frames == 0
    }

    fn duration(&self) -> u64 {
        self.table.durations.total_duration()
    }
}

/// Streaming QuickTime movie writer.
///
/// Audio tracks must be added before the first video frame; [`close`](Self::close)
/// writes the `moov` atom and returns the underlying writer.
pub struct MovWriter<W: Write + Seek> {
    mdat: MediaData<W>,
    mdat_size_pos: u64,
    video: VideoTrack,
    audio: Vec<AudioTrack>,
    edit_lists: bool,
    buffer: Vec<u8>,
}

impl MovWriter<BufWriter<File>> {
    /// Create (or truncate) a movie file at `path`.
    pub fn create(path: &Path) -> MuxResult<Self> {
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "Creating movie");
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Seek> MovWriter<W> {
    /// Write `ftyp` and the `mdat` header. `writer` must be positioned at 0.
    pub fn new(mut writer: W) -> MuxResult<Self> {
        mov::ftyp().write_to(&mut writer)?;
        let mdat_size_pos = large_box_size_placeholder(&mut writer, b"mdat")?;
        Ok(Self {
            mdat: MediaData {
                writer,
                position: mdat_size_pos + 8,
            },
            mdat_size_pos,
            video: VideoTrack::default(),
            audio: Vec::new(),
            edit_lists: true,
            buffer: Vec::new(),
        })
    }

    /// Position single-placement tracks with edit lists (default) or by
    /// prefixing the stream with silence. Segmented tracks always use edit lists.
    pub fn with_edit_lists(mut self, enabled: bool) -> Self {
        self.edit_lists = enabled;
        self
    }

    /// Add a track that starts playing at `start_ms` and is cut off at
    /// `end_ms` (if given and reached before the input runs out).
    pub fn add_audio_track(
        &mut self,
        input: AudioInput,
        start_ms: u64,
        end_ms: Option<u64>,
    ) -> MuxResult<()> {
        self.check_audio_allowed()?;
        validate_audio_format(&input.format)?;
        let format = input.format;
        let frame_size = u64::from(format.frame_size());

        let mut reader = input.reader;
        let length_ms = match end_ms {
            Some(end) if end <= start_ms => {
                return Err(MuxError::InvalidConfig(format!(
                    "audio track ends at {end} ms, before its start at {start_ms} ms"
                )));
            }
            Some(end) => {
                let limit = rescale(end - start_ms, MOVIE_TIMESCALE, format.sample_rate) * frame_size;
                reader = Box::new(reader.take(limit));
                Some(end - start_ms)
            }
            None => None,
        };

        let arrangement = if self.edit_lists {
            Arrangement::Edited {
                placements: vec![AudioPlacement::new(start_ms, 0, length_ms.unwrap_or(0))],
                open_ended: length_ms.is_none(),
            }
        } else {
            if start_ms > 0 {
                let silence = rescale(start_ms, MOVIE_TIMESCALE, format.sample_rate) * frame_size;
                let fill = if format.bits_per_sample == 8 { 0x80 } else { 0 };
                reader = Box::new(io::repeat(fill).take(silence).chain(reader));
            }
            Arrangement::SilencePrefixed
        };

        self.push_audio_track(AudioInput { reader, format }, arrangement)
    }

    /// Add a track whose media is a concatenation of segments, each played
    /// at its placement's movie offset through an edit list.
    pub fn add_segmented_audio_track(
        &mut self,
        input: AudioInput,
        placements: &[AudioPlacement],
    ) -> MuxResult<()> {
        self.check_audio_allowed()?;
        validate_audio_format(&input.format)?;
        if placements.is_empty() {
            return Err(MuxError::InvalidConfig(
                "segmented audio track has no placements".into(),
            ));
        }
        if let Some(index) = placements.iter().position(|p| p.length_ms == 0) {
            return Err(MuxError::InvalidConfig(format!(
                "placement {index} has zero duration"
            )));
        }
        self.push_audio_track(
            input,
            Arrangement::Edited {
                placements: placements.to_vec(),
                open_ended: false,
            },
        )
    }

    fn check_audio_allowed(&self) -> MuxResult<()> {
        if self.video.is_empty() {
            Ok(())
        } else {
            Err(MuxError::AudioAfterVideo)
        }
    }

    fn push_audio_track(&mut self, input: AudioInput, arrangement: Arrangement) -> MuxResult<()> {
        let mut track = AudioTrack::new(input, arrangement);
        track.write_audio(AUDIO_STEP_MS, &mut self.mdat, &mut self.buffer)?;
        tracing::info!(
            track_id = self.audio.len() as u32 + 2,
            format = %track.format,
            "Added audio track"
        );
        self.audio.push(track);
        Ok(())
    }

    /// Append one frame lasting `duration_ms`.
    pub fn add_video_frame(&mut self, duration_ms: u64, frame: &VideoFrame) -> MuxResult<()> {
        if duration_ms == 0 || duration_ms > u64::from(u32::MAX) {
            return Err(MuxError::InvalidConfig(format!(
                "frame {} has duration {duration_ms} ms",
                self.video.frames
            )));
        }
        if frame.data.is_empty() {
            return Err(MuxError::InvalidConfig(format!(
                "frame {} has no image data",
                self.video.frames
            )));
        }
        match self.video.size {
            None if frame.width == 0 || frame.height == 0 => {
                return Err(MuxError::InvalidConfig(format!(
                    "frame size {}x{} has a zero dimension",
                    frame.width, frame.height
                )));
            }
            None => self.video.size = Some((frame.width, frame.height)),
            Some((width, height)) if (width, height) != (frame.width, frame.height) => {
                return Err(MuxError::DimensionMismatch {
                    index: self.video.frames,
                    width,
                    height,
                    actual_width: frame.width,
                    actual_height: frame.height,
                });
            }
            Some(_) => {}
        }

        let offset = self.mdat.append(&frame.data)?;
        self.video.table.durations.add(duration_ms as u32);
        self.video.table.sizes.push(frame.data.len() as u32);
        self.video.frames += 1;

        let (first, samples, duration) = self.video.pending.get_or_insert((offset, 0, 0));
        *samples += 1;
        *duration += duration_ms;
        let (first, samples, duration) = (*first, *samples, *duration);
        if duration >= u64::from(MOVIE_TIMESCALE) {
            self.close_video_chunk(first, samples, duration)?;
        }
        Ok(())
    }

    fn close_video_chunk(&mut self, first: u64, samples: u32, duration: u64) -> MuxResult<()> {
        self.video.pending = None;
        self.video.table.chunks.push_chunk(samples);
        self.video.table.offsets.push(first);
        for track in &mut self.audio {
            track.write_audio(duration, &mut self.mdat, &mut self.buffer)?;
        }
        Ok(())
    }

    /// Finish the movie. With `write_remaining_audio`, audio that outlasts
    /// the video is drained into the file; otherwise it stops with the video.
    pub fn close(mut self, write_remaining_audio: bool) -> MuxResult<W> {
        if let Some((first, samples, duration)) = self.video.pending {
            self.close_video_chunk(first, samples, duration)?;
        }
        if write_remaining_audio {
            loop {
                let mut wrote = false;
                for track in &mut self.audio {
                    wrote |= track.write_audio(AUDIO_STEP_MS, &mut self.mdat, &mut self.buffer)?;
                }
                if !wrote {
                    break;
                }
            }
        }

        let MediaData { mut writer, .. } = self.mdat;
        let mdat_size = fill_large_box_size(&mut writer, self.mdat_size_pos)?;

        let video_duration = self.video.duration();
        let (width, height) = self.video.size.unwrap_or((0, 0));
        let mut duration = video_duration;
        let mut traks = vec![mov::video_trak(VIDEO_TRACK_ID, width, height, &self.video.table)];
        let audio_tracks = self.audio.len();
        for (index, track) in self.audio.into_iter().enumerate() {
            duration = duration.max(track.duration());
            traks.push(track.into_atom(index as u32 + 2));
        }

        let mut children = vec![mov::mvhd(duration, audio_tracks as u32 + 2)];
        children.extend(traks);
        let moov = Atom::parent(b"moov", children);
        moov.write_to(&mut writer)?;
        writer.flush()?;

        tracing::info!(
            frames = self.video.frames,
            audio_tracks,
            duration_ms = duration,
            mdat_bytes = mdat_size,
            "Movie finalized"
        );
        Ok(writer)
    }
}

fn validate_audio_format(format: &PcmFormat) -> MuxResult<()> {
    if !matches!(format.bits_per_sample, 8 | 16) {
        return Err(MuxError::InvalidConfig(format!(
            "unsupported bits per sample: {}",
            format.bits_per_sample
        )));
    }
    if !matches!(format.channels, 1 | 2) {
        return Err(MuxError::InvalidConfig(format!(
            "unsupported channel count: {}",
            format.channels
        )));
    }
    if format.sample_rate == 0 {
        return Err(MuxError::InvalidConfig("sample rate is zero".into()));
    }
    Ok(())
}
