//! `reel-mux`: QuickTime movie writer for narrative export.
//!
//! This crate writes JPEG video and PCM audio into a `.mov` file built
//! directly from atoms and sample tables, with no container library.
//!
//! # Architecture
//!
//! - **Streaming media data**: samples are appended to `mdat` as they arrive
//! - **Chunk interleaving**: each second of video is followed by a second of every audio track
//! - **Moov-at-end**: the metadata tree is built in memory and written by `close()`
//! - **Edit lists**: discontiguous audio segments are placed with `elst` skip/play entries
//! - **Inspector**: a read-only parser for checking finished files
//!
//! # Usage
//!
//! ```ignore
//! use reel_mux::{AudioInput, MovWriter, VideoFrame};
//!
//! let mut writer = MovWriter::create(Path::new("story.mov"))?;
//! writer.add_audio_track(AudioInput::from_file(&pcm_path, format)?, 0, None)?;
//! writer.add_video_frame(2000, &VideoFrame::new(640, 480, jpeg_bytes))?;
//! writer.close(true)?;
//! ```

pub mod atoms;
pub mod error;
pub mod inspect;
pub mod mov;
pub mod sample_table;
pub mod writer;

// Re-export primary API types
pub use atoms::{Atom, AtomBody, MOVIE_TIMESCALE};
pub use error::{MuxError, MuxResult};
pub use inspect::{inspect_bytes, inspect_file, AtomNode, MovieSummary, TrackSummary};
pub use mov::EditEntry;
pub use sample_table::ChunkRun;
pub use writer::{placements_from_parts, AudioInput, MovWriter, VideoFrame};
