//! `reel-common`: Shared types and settings for the reel narrative movie exporter.
//!
//! This crate is the foundation that all other reel crates depend on:
//!
//! - **Types**: `Frame`, `AudioSegment`, `SpanningAudio` (the narrative timeline), `AudioPlacement`
//! - **Codec**: `AudioCodec` families keyed by file extension
//! - **PCM**: `PcmFormat`, `SampleOrder`, `PcmBuffer` (raw audio with explicit byte order)
//! - **Config**: `ExportSettings`, `SampleRateSetting`, `AudioLayout`, `Narrative` manifest
//! - **Errors**: `ConfigError` (thiserror-based)

pub mod codec;
pub mod config;
pub mod error;
pub mod pcm;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::AudioCodec;
pub use config::{
    AudioLayout, ExportSettings, Narrative, SampleRateSetting, DEFAULT_SAMPLE_RATE,
    MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
};
pub use error::{ConfigError, ConfigResult};
pub use pcm::{swap_byte_pairs, PcmBuffer, PcmFormat, SampleOrder};
pub use types::{
    frame_start_times, total_duration_ms, AudioPlacement, AudioSegment, Frame, SpanningAudio,
};
