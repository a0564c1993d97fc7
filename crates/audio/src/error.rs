//! Audio error types (thiserror-based).
//!
//! Every variant here is recoverable at the assembly level: a failed decode
//! silences one segment, a failed resample keeps the original PCM, and a
//! failed mix falls back to the first track.

use std::path::PathBuf;

use reel_common::AudioCodec;
use thiserror::Error;

/// Failure to turn one compressed audio file into PCM.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open audio file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No decoder available for {0:?}")]
    UnsupportedCodec(AudioCodec),

    #[error("Unrecognised audio file extension: {0:?}")]
    UnknownExtension(PathBuf),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track found in file")]
    NoAudioTrack,

    #[error("File too small to parse ({size} bytes)")]
    TooSmall { size: u64 },

    #[error("Not a RIFF/WAVE file")]
    NotWave,

    #[error("WAV file has bad fmt chunk (length {0})")]
    BadFmtChunk(u32),

    #[error("Unsupported WAV encoding {0} (only linear PCM is supported)")]
    UnsupportedEncoding(u16),

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Bad WAV file: data chunk before fmt chunk")]
    DataBeforeFmt,

    #[error("WAV file has no data chunk")]
    MissingData,

    #[error("Decode error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to convert PCM between rates or bit depths.
#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("Invalid sample rate conversion {from} Hz -> {to} Hz")]
    InvalidRate { from: u32, to: u32 },

    #[error("Unsupported bit depth for resampling: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Unsupported channel count for resampling: {0}")]
    UnsupportedChannels(u16),

    #[error("Buffer of {len} bytes is not a whole number of {frame_size}-byte frames")]
    Misaligned { len: usize, frame_size: u32 },
}

/// Failure while building or mixing per-track PCM files.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Failed to create temporary file in {dir:?}: {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot mix {0} tracks")]
    TrackCount(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for the audio crate.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Convenience Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
