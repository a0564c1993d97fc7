//! `reel-audio`: PCM decoding, resampling and multi-track assembly for narrative export.
//!
//! This crate turns the audio attached to narrative frames into PCM the
//! movie writer can interleave:
//!
//! - **Decoding**: per-codec strategies (Symphonia for AAC/MP3, a RIFF reader for WAV)
//!   producing 16-bit PCM with explicit byte order
//! - **Resampling**: anti-alias low-pass plus linear interpolation, and 8/16-bit conversion
//! - **Assembly**: silence-aligned per-lane tracks written to scoped temp files
//! - **Mixing**: carry-safe sample averaging streamed in fixed-size blocks
//! - **Layouts**: combined (mixed), segmented (edit-listed) and individual tracks
//!
//! # Architecture
//!
//! ```text
//! Frame list -> AudioAssembler ---------------------------> CombinedAudioTrack
//!                  |   ^                                   (or PlacedAudioTracks)
//!                  v   |
//!              Decoders -> Resampler -> TrackFile(s) -> BlockMixer
//! ```
//!
//! Decode and resample failures are absorbed per segment (the segment is
//! silenced or left unconverted); only temp-file IO failures surface as
//! errors. Temporary files live as long as the returned track values.

pub mod assembler;
pub mod decoder;
pub mod error;
pub mod layouts;
pub mod mixer;
pub mod resampler;
pub mod temp;

// Re-export primary types at crate root for convenience
pub use assembler::{spanning_first, track_count, AudioAssembler, CombinedAudioTrack};
pub use decoder::{
    ChannelMode, DecodeOptions, Decoders, MillisRange, PcmDecoder, SymphoniaDecoder, WavDecoder,
};
pub use error::{AssemblyError, AudioError, AudioResult, DecodeError, ResampleError};
pub use layouts::PlacedAudioTrack;
pub use mixer::{average2, average3, average_many, BlockMixer, MIX_BLOCK_SIZE};
pub use resampler::{resample, resample_to_mono16, LowPassFilter, Resampler};
