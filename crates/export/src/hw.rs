//! Hardware codec pipeline orchestration.
//!
//! The host supplies a video encoder fed through a [`FrameSurface`], an
//! optional audio encoder, and a [`HostMuxer`]. [`CodecPipeline`] drives them
//! from a single poll loop:
//!
//! ```text
//! loop {
//!   drain video encoder  ──┐
//!   drain audio encoder  ──┼── MuxerGate (starts once every track has a format)
//!   render frame @ pts     │
//!   queue one frame interval of PCM
//! }
//! ```
//!
//! Encoded samples that arrive before the muxer starts are held per track
//! and flushed in order once it does.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use reel_common::{Frame, PcmFormat};
use reel_mux::AudioInput;

use crate::error::{ExportError, ExportResult};

/// Frames per second of the encoded video.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Replacement step for audio output timestamps that go backwards. One
/// 1024-sample AAC frame at 44.1 kHz.
pub const AUDIO_PTS_INCREMENT_US: i64 = 23_219;

const DRAIN_TIMEOUT: Duration = Duration::from_micros(100);

// ---------------------------------------------------------------------------
// Host contracts
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Output format reported by an encoder, handed to the muxer as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackFormat {
    pub kind: TrackKind,
    pub mime: String,
}

impl TrackFormat {
    pub fn new(kind: TrackKind, mime: impl Into<String>) -> Self {
        Self {
            kind,
            mime: mime.into(),
        }
    }
}

/// One buffer of encoder output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub pts_us: i64,
    /// Codec configuration data rather than media. Never muxed.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl EncodedSample {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            data,
            pts_us,
            codec_config: false,
            end_of_stream: false,
        }
    }

    pub fn codec_config(data: Vec<u8>) -> Self {
        Self {
            codec_config: true,
            ..Self::new(data, 0)
        }
    }

    /// Empty buffer that only carries the end-of-stream flag.
    pub fn end_of_stream() -> Self {
        Self::new(Vec::new(), 0).with_end_of_stream()
    }

    pub fn with_end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}

/// Result of one bounded-timeout poll of an encoder's output queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderOutput {
    /// Nothing available within the timeout.
    TryAgain,
    FormatChanged(TrackFormat),
    Sample(EncodedSample),
}

pub trait EncoderOutputQueue: Send {
    fn dequeue_output(&mut self, timeout: Duration) -> ExportResult<EncoderOutput>;
}

/// Video encoder whose input arrives through a [`FrameSurface`].
pub trait VideoEncoder: EncoderOutputQueue {
    fn signal_end_of_input(&mut self) -> ExportResult<()>;
}

pub trait AudioEncoder: EncoderOutputQueue {
    /// Queue raw PCM. Blocks until the encoder accepts it; the final chunk
    /// carries `end_of_stream`.
    fn queue_input(&mut self, pcm: &[u8], pts_us: i64, end_of_stream: bool) -> ExportResult<()>;
}

/// Input surface of the video encoder.
pub trait FrameSurface: Send {
    /// Draw `frame` and submit it with presentation time `pts_us`.
    fn render(&mut self, frame: &Frame, pts_us: i64) -> ExportResult<()>;
}

pub trait HostMuxer: Send {
    /// Register a track, returning its index.
    fn add_track(&mut self, format: &TrackFormat) -> ExportResult<usize>;
    fn start(&mut self) -> ExportResult<()>;
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> ExportResult<()>;
    fn stop(&mut self) -> ExportResult<()>;
}

// ---------------------------------------------------------------------------
// Muxer gate
// ---------------------------------------------------------------------------

/// Serialises access to the host muxer and holds it back until every
/// expected track has been added.
struct MuxerGate {
    state: Mutex<GateState>,
}

struct GateState {
    muxer: Box<dyn HostMuxer>,
    expected_tracks: usize,
    tracks_added: usize,
    tracks_finished: usize,
    started: bool,
    stopped: bool,
    samples_written: u64,
    bytes_written: u64,
}

impl MuxerGate {
    fn new(muxer: Box<dyn HostMuxer>, expected_tracks: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                muxer,
                expected_tracks,
                tracks_added: 0,
                tracks_finished: 0,
                started: false,
                stopped: false,
                samples_written: 0,
                bytes_written: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock()
    }
}

impl GateState {
    fn add_track(&mut self, format: &TrackFormat) -> ExportResult<usize> {
        let index = self.muxer.add_track(format)?;
        self.tracks_added += 1;
        debug!(kind = ?format.kind, mime = %format.mime, index, "Muxer track added");
        if self.all_tracks_added() {
            self.muxer.start()?;
            self.started = true;
            info!(tracks = self.tracks_added, "Muxer started");
        }
        Ok(index)
    }

    fn all_tracks_added(&self) -> bool {
        self.tracks_added == self.expected_tracks
    }

    fn write(&mut self, track: usize, sample: &EncodedSample) -> ExportResult<()> {
        self.muxer.write_sample(track, sample)?;
        self.samples_written += 1;
        self.bytes_written += sample.data.len() as u64;
        Ok(())
    }

    fn finish_track(&mut self) -> ExportResult<()> {
        self.tracks_finished += 1;
        if self.tracks_finished == self.expected_tracks {
            self.stop()?;
        }
        Ok(())
    }

    /// Stop the muxer. Safe to call more than once.
    fn stop(&mut self) -> ExportResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if self.tracks_finished < self.expected_tracks {
            warn!(
                finished = self.tracks_finished,
                expected = self.expected_tracks,
                "Stopping muxer before every track finished"
            );
        }
        if !self.started {
            warn!("Muxer was never started");
            return Ok(());
        }
        self.muxer.stop()?;
        info!(
            samples = self.samples_written,
            bytes = self.bytes_written,
            "Muxer stopped"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-track drain state
// ---------------------------------------------------------------------------

struct TrackState {
    kind: TrackKind,
    index: Option<usize>,
    pending: VecDeque<EncodedSample>,
    last_pts_us: i64,
    finished: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Drain {
    /// Output exhausted for now.
    Idle,
    /// End of stream reached after it was requested.
    Finished,
    /// The encoder ended on its own.
    EndedEarly,
}

impl TrackState {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            index: None,
            pending: VecDeque::new(),
            last_pts_us: 0,
            finished: false,
        }
    }

    /// Audio timestamps never go backwards; no timestamp is negative.
    fn output_pts(&mut self, pts_us: i64) -> i64 {
        let mut pts_us = pts_us;
        if self.kind == TrackKind::Audio {
            if pts_us < self.last_pts_us {
                pts_us = self.last_pts_us + AUDIO_PTS_INCREMENT_US;
            }
            self.last_pts_us = pts_us;
        }
        pts_us.max(0)
    }

    fn write(&mut self, gate: &mut GateState, mut sample: EncodedSample) -> ExportResult<()> {
        let index = self.index.ok_or_else(|| {
            ExportError::Codec(format!("{:?} sample arrived before its output format", self.kind))
        })?;
        sample.pts_us = self.output_pts(sample.pts_us);
        gate.write(index, &sample)
    }

    fn flush_pending(&mut self, gate: &mut GateState) -> ExportResult<()> {
        if !self.pending.is_empty() {
            debug!(kind = ?self.kind, samples = self.pending.len(), "Flushing buffered samples");
        }
        while let Some(sample) = self.pending.pop_front() {
            self.write(gate, sample)?;
        }
        Ok(())
    }
}

/// Move everything the encoder has ready into the muxer. With
/// `end_of_stream` set, keeps polling until the encoder confirms the end.
fn drain<E: EncoderOutputQueue + ?Sized>(
    encoder: &mut E,
    track: &mut TrackState,
    gate: &mut GateState,
    end_of_stream: bool,
) -> ExportResult<Drain> {
    loop {
        match encoder.dequeue_output(DRAIN_TIMEOUT)? {
            EncoderOutput::TryAgain => {
                if !end_of_stream {
                    return Ok(Drain::Idle);
                }
            }
            EncoderOutput::FormatChanged(format) => {
                if gate.started || track.index.is_some() {
                    warn!(kind = ?track.kind, mime = %format.mime, "Output format changed after muxing began, ignoring");
                } else {
                    track.index = Some(gate.add_track(&format)?);
                    if !gate.all_tracks_added() {
                        // Other encoders must report their formats first
                        return Ok(Drain::Idle);
                    }
                }
            }
            EncoderOutput::Sample(sample) => {
                let ended = sample.end_of_stream;
                if sample.codec_config {
                    debug!(kind = ?track.kind, bytes = sample.data.len(), "Skipping codec config buffer");
                } else if !sample.data.is_empty() {
                    if gate.started {
                        track.flush_pending(gate)?;
                        track.write(gate, sample)?;
                    } else {
                        track.pending.push_back(sample);
                    }
                }
                if ended {
                    if gate.started {
                        track.flush_pending(gate)?;
                    }
                    track.finished = true;
                    gate.finish_track()?;
                    if end_of_stream {
                        debug!(kind = ?track.kind, "Encoder finished");
                        return Ok(Drain::Finished);
                    }
                    warn!(kind = ?track.kind, "Encoder reached end of stream unexpectedly");
                    return Ok(Drain::EndedEarly);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Audio pump
// ---------------------------------------------------------------------------

/// Feeds the audio encoder one video-frame interval of PCM per tick,
/// switching to silence once the source runs dry.
struct AudioPump {
    encoder: Box<dyn AudioEncoder>,
    reader: Box<dyn Read + Send>,
    format: PcmFormat,
    chunk: Vec<u8>,
    pts_us: i64,
    exhausted: bool,
    end_queued: bool,
    chunks: u64,
}

impl AudioPump {
    fn new(encoder: Box<dyn AudioEncoder>, input: AudioInput, frame_rate: u32) -> ExportResult<Self> {
        let format = *input.format();
        let chunk_len = bytes_per_second(&format) / u64::from(frame_rate);
        if chunk_len == 0 {
            return Err(ExportError::InitFailed(format!(
                "Audio format {format:?} yields an empty chunk at {frame_rate} fps"
            )));
        }
        Ok(Self {
            encoder,
            reader: input.into_reader(),
            format,
            chunk: vec![0; chunk_len as usize],
            pts_us: 0,
            exhausted: false,
            end_queued: false,
            chunks: 0,
        })
    }

    fn chunk_duration_us(&self, len: usize) -> i64 {
        (len as u64 * 1_000_000 / bytes_per_second(&self.format)) as i64
    }

    fn send(&mut self, end_of_stream: bool) -> ExportResult<()> {
        let mut len = 0;
        if !self.exhausted {
            len = read_chunk(self.reader.as_mut(), &mut self.chunk)?;
        }
        if len == 0 {
            if !self.exhausted {
                debug!(pts_us = self.pts_us, "Audio source exhausted, queueing silence");
                self.exhausted = true;
            }
            let silence = if self.format.bits_per_sample == 8 { 0x80 } else { 0 };
            self.chunk.fill(silence);
            len = self.chunk.len();
        }
        self.encoder
            .queue_input(&self.chunk[..len], self.pts_us, end_of_stream)?;
        self.pts_us += self.chunk_duration_us(len);
        self.chunks += 1;
        self.end_queued = end_of_stream;
        Ok(())
    }
}

fn bytes_per_second(format: &PcmFormat) -> u64 {
    u64::from(format.sample_rate) * u64::from(format.frame_size())
}

/// Fill `buf` as far as the reader allows. Returns the byte count.
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// CodecPipeline
// ---------------------------------------------------------------------------

/// Statistics from a hardware encode.
#[derive(Clone, Debug, Default)]
pub struct HwExportStats {
    /// Frames submitted to the video surface.
    pub video_frames: u64,
    /// PCM chunks queued to the audio encoder.
    pub audio_chunks: u64,
    /// Encoded samples handed to the muxer (both tracks).
    pub samples_written: u64,
    pub bytes_written: u64,
    /// Presentation time of the last video frame.
    pub final_pts_us: i64,
    pub encode_duration_secs: f64,
}

/// Drives a host encoder pair into a host muxer.
///
/// # Usage
///
/// ```ignore
/// let stats = CodecPipeline::new(video, surface, muxer)
///     .with_audio(audio_encoder, AudioInput::from_file(&pcm, format)?)
///     .run(&narrative.frames)?;
/// ```
pub struct CodecPipeline {
    video: Box<dyn VideoEncoder>,
    surface: Box<dyn FrameSurface>,
    muxer: Box<dyn HostMuxer>,
    audio: Option<(Box<dyn AudioEncoder>, AudioInput)>,
    frame_rate: u32,
}

impl std::fmt::Debug for CodecPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecPipeline")
            .field("frame_rate", &self.frame_rate)
            .field("has_audio", &self.audio.is_some())
            .finish_non_exhaustive()
    }
}

impl CodecPipeline {
    pub fn new(
        video: Box<dyn VideoEncoder>,
        surface: Box<dyn FrameSurface>,
        muxer: Box<dyn HostMuxer>,
    ) -> Self {
        Self {
            video,
            surface,
            muxer,
            audio: None,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Add an audio track encoded from `input`.
    pub fn with_audio(mut self, encoder: Box<dyn AudioEncoder>, input: AudioInput) -> Self {
        self.audio = Some((encoder, input));
        self
    }

    /// Encode `frames`. Returns `Ok(None)` when no frame has a duration.
    ///
    /// Leading zero-length frames are skipped; any later zero-length frame
    /// ends the video. The muxer is stopped on every exit path.
    pub fn run(self, frames: &[Frame]) -> ExportResult<Option<HwExportStats>> {
        if self.frame_rate == 0 {
            return Err(ExportError::InitFailed("Frame rate must be > 0".to_string()));
        }
        let Some(first) = frames.iter().position(|f| f.duration_ms > 0) else {
            info!("No frames with a duration, nothing to encode");
            return Ok(None);
        };

        let Self {
            video,
            surface,
            muxer,
            audio,
            frame_rate,
        } = self;
        let pump = audio
            .map(|(encoder, input)| AudioPump::new(encoder, input, frame_rate))
            .transpose()?;
        let expected_tracks = if pump.is_some() { 2 } else { 1 };

        info!(
            frames = frames.len(),
            frame_rate,
            audio = pump.is_some(),
            "Starting hardware encode"
        );

        let mut session = Session {
            frames,
            video,
            surface,
            pump,
            gate: MuxerGate::new(muxer, expected_tracks),
            video_track: TrackState::new(TrackKind::Video),
            audio_track: TrackState::new(TrackKind::Audio),
            frame_rate,
        };
        let start = Instant::now();
        let result = session.encode(first);
        let stopped = session.gate.lock().stop();

        let mut stats = result?;
        stopped?;
        stats.encode_duration_secs = start.elapsed().as_secs_f64();
        info!(
            video_frames = stats.video_frames,
            audio_chunks = stats.audio_chunks,
            samples = stats.samples_written,
            duration_secs = stats.encode_duration_secs,
            "Hardware encode finished"
        );
        Ok(Some(stats))
    }
}

struct Session<'a> {
    frames: &'a [Frame],
    video: Box<dyn VideoEncoder>,
    surface: Box<dyn FrameSurface>,
    pump: Option<AudioPump>,
    gate: MuxerGate,
    video_track: TrackState,
    audio_track: TrackState,
    frame_rate: u32,
}

fn duration_us(frame: &Frame) -> i64 {
    i64::try_from(frame.duration_ms.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl Session<'_> {
    fn encode(&mut self, first: usize) -> ExportResult<HwExportStats> {
        let increment_us = 1_000_000 / i64::from(self.frame_rate);
        let mut current = first;
        let mut video_pts_us = 0i64;
        let mut frame_end_us = duration_us(&self.frames[current]);
        let mut end_of_stream = false;
        let mut first_frame_ready = false;
        let mut stats = HwExportStats::default();

        loop {
            if !self.video_track.finished {
                let mut gate = self.gate.lock();
                if end_of_stream {
                    self.video.signal_end_of_input()?;
                }
                let drained = drain(self.video.as_mut(), &mut self.video_track, &mut gate, end_of_stream)?;
                if drained == Drain::EndedEarly {
                    end_of_stream = true;
                }
            }
            // Audio is only drained once a video frame is in flight
            if let Some(pump) = self.pump.as_mut().filter(|_| first_frame_ready) {
                if !self.audio_track.finished {
                    let mut gate = self.gate.lock();
                    let drained = drain(
                        pump.encoder.as_mut(),
                        &mut self.audio_track,
                        &mut gate,
                        pump.end_queued,
                    )?;
                    if drained == Drain::EndedEarly {
                        end_of_stream = true;
                    }
                }
            }
            if end_of_stream {
                break;
            }

            let drawn = current;
            let mut pts_us = video_pts_us;
            video_pts_us += increment_us;
            if video_pts_us > frame_end_us {
                match self.frames.get(current + 1) {
                    Some(next) if next.duration_ms > 0 => {
                        current += 1;
                        video_pts_us = frame_end_us;
                        frame_end_us += duration_us(next);
                    }
                    _ => {
                        debug!(pts_us = video_pts_us, "Reached end of video");
                        end_of_stream = true;
                    }
                }
            }

            if let Some(pump) = self.pump.as_mut() {
                pump.send(end_of_stream)?;
                if end_of_stream {
                    // Stretch the last frame to cover the queued audio
                    pts_us = pump.pts_us;
                }
            }

            self.surface.render(&self.frames[drawn], pts_us)?;
            stats.video_frames += 1;
            stats.final_pts_us = pts_us;
            first_frame_ready = true;
        }

        let gate = self.gate.lock();
        stats.samples_written = gate.samples_written;
        stats.bytes_written = gate.bytes_written;
        stats.audio_chunks = self.pump.as_ref().map_or(0, |p| p.chunks);
        Ok(stats)
    }
}
