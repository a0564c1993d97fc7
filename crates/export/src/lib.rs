//! `reel-export`: Narrative-to-movie export.
//!
//! Two paths share the same narrative model:
//!
//! - **Software**: [`export_mov`] assembles the audio, rasterizes each frame
//!   to JPEG and writes a QuickTime movie with `reel-mux`. [`ExportJob`] runs
//!   it on a background thread with progress reporting.
//! - **Hardware**: [`CodecPipeline`] drives host-provided encoders into a
//!   host muxer, see [`hw`].

pub mod error;
pub mod hw;
pub mod job;
pub mod pipeline;
pub mod rasterizer;

pub use error::{ExportError, ExportResult};
pub use hw::{
    AudioEncoder, CodecPipeline, EncodedSample, EncoderOutput, EncoderOutputQueue, FrameSurface,
    HostMuxer, HwExportStats, TrackFormat, TrackKind, VideoEncoder, DEFAULT_FRAME_RATE,
};
pub use job::ExportJob;
pub use pipeline::{export_mov, ExportProgress};
pub use rasterizer::{FrameRasterizer, JpegRasterizer};
