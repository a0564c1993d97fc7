//! Software export: narrative frames to a QuickTime movie.
//!
//! ```text
//! export_mov()
//!   |
//!   +-- validate settings, skip empty narratives
//!   +-- assemble audio (combined / segmented / individual) into temp PCM
//!   +-- MovWriter into a staging file next to the output:
//!   |     add audio tracks, then one JPEG sample per frame
//!   +-- close the writer, rename the staging file over the output
//!   +-- release the temp PCM files
//! ```
//!
//! The output path only ever holds a finished movie. A failed export
//! deletes its staging file and leaves the output untouched.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use reel_audio::{AudioAssembler, CombinedAudioTrack, Decoders, PlacedAudioTrack};
use reel_common::{total_duration_ms, AudioLayout, ExportSettings, Frame, Narrative};
use reel_mux::{AudioInput, MovWriter};

use crate::error::ExportResult;
use crate::rasterizer::FrameRasterizer;

/// Progress events emitted while an export runs.
#[derive(Clone, Debug, PartialEq)]
pub enum ExportProgress {
    /// Export has started.
    Started { total_frames: usize },
    /// Audio has been decoded and laid out into `tracks` movie tracks.
    AudioAssembled { tracks: usize },
    /// A frame has been rendered and written (0-based).
    FrameWritten { frame: usize, total: usize },
    /// Export finished. `output` is `None` for an empty narrative.
    Completed {
        output: Option<PathBuf>,
        duration_secs: f64,
    },
    /// Export failed; nothing was written to the output path.
    Failed { error: String },
}

impl ExportProgress {
    /// Get the progress as a fraction (0.0 to 1.0).
    pub fn progress_fraction(&self) -> f64 {
        match self {
            Self::Started { .. } | Self::AudioAssembled { .. } => 0.0,
            Self::FrameWritten { frame, total } => {
                if *total > 0 {
                    (*frame + 1) as f64 / *total as f64
                } else {
                    0.0
                }
            }
            Self::Completed { .. } => 1.0,
            Self::Failed { .. } => 0.0,
        }
    }

    /// Check if the export has finished (success or failure).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Temp PCM backing the movie's audio tracks. Released only after the
/// writer has streamed everything out of it.
enum AssembledAudio {
    None,
    Combined(CombinedAudioTrack),
    Placed {
        layout: AudioLayout,
        tracks: Vec<PlacedAudioTrack>,
    },
}

impl AssembledAudio {
    fn track_count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Combined(_) => 1,
            Self::Placed { tracks, .. } => tracks.len(),
        }
    }

    fn add_to<W: std::io::Write + std::io::Seek>(&self, writer: &mut MovWriter<W>) -> ExportResult<()> {
        match self {
            Self::None => {}
            Self::Combined(track) => {
                writer.add_audio_track(AudioInput::from_file(track.pcm_path(), track.format())?, 0, None)?;
            }
            Self::Placed { layout, tracks } => {
                for track in tracks {
                    let input = AudioInput::from_file(track.pcm_path(), track.format)?;
                    match (layout, track.placements.as_slice()) {
                        (AudioLayout::Individual, [placement]) => writer.add_audio_track(
                            input,
                            placement.offset_ms,
                            Some(placement.end_ms()),
                        )?,
                        _ => writer.add_segmented_audio_track(input, &track.placements)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn release(self) {
        let result = match self {
            Self::None => Ok(()),
            Self::Combined(track) => track.close(),
            Self::Placed { tracks, .. } => tracks.into_iter().try_for_each(PlacedAudioTrack::close),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to remove temporary audio");
        }
    }
}

/// Export `narrative` to `output`.
///
/// Returns `Ok(None)` when there is nothing to export (no frames, or zero
/// total duration), `Ok(Some(output))` on success. On error no partial
/// movie is left behind.
pub fn export_mov(
    narrative: &Narrative,
    output: &Path,
    decoders: &Decoders,
    rasterizer: &mut dyn FrameRasterizer,
    on_progress: &mut dyn FnMut(ExportProgress),
) -> ExportResult<Option<PathBuf>> {
    let settings = &narrative.settings;
    settings.validate()?;
    let frames = &narrative.frames;
    if frames.is_empty() || total_duration_ms(frames) == 0 {
        info!(output = %output.display(), "Nothing to export");
        return Ok(None);
    }

    let start = Instant::now();
    on_progress(ExportProgress::Started {
        total_frames: frames.len(),
    });
    info!(
        output = %output.display(),
        frames = frames.len(),
        layout = ?settings.audio_layout,
        width = settings.width,
        height = settings.height,
        "Starting export"
    );

    let audio = assemble_audio(frames, settings, output, decoders);
    on_progress(ExportProgress::AudioAssembled {
        tracks: audio.track_count(),
    });

    let result = write_movie(frames, settings, output, &audio, rasterizer, on_progress);
    audio.release();

    match result {
        Ok(()) => {
            let duration_secs = start.elapsed().as_secs_f64();
            info!(output = %output.display(), duration_secs, "Export completed");
            Ok(Some(output.to_path_buf()))
        }
        Err(e) => {
            warn!(output = %output.display(), error = %e, "Export failed, discarding staged movie");
            Err(e)
        }
    }
}

fn output_dir(output: &Path) -> PathBuf {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn temp_dir_for(settings: &ExportSettings, output: &Path) -> PathBuf {
    settings
        .temp_dir
        .clone()
        .unwrap_or_else(|| output_dir(output))
}

/// Lay out the narrative's audio. Assembly failures drop the audio, never the export.
fn assemble_audio(
    frames: &[Frame],
    settings: &ExportSettings,
    output: &Path,
    decoders: &Decoders,
) -> AssembledAudio {
    let assembler = AudioAssembler::new(decoders, temp_dir_for(settings, output))
        .with_sample_rate(settings.sample_rate);
    let assembled = match settings.audio_layout {
        AudioLayout::Combined => assembler.assemble(frames).map(|track| {
            track.map_or(AssembledAudio::None, AssembledAudio::Combined)
        }),
        layout @ AudioLayout::Segmented => assembler
            .assemble_segmented(frames)
            .map(|tracks| AssembledAudio::Placed { layout, tracks }),
        layout @ AudioLayout::Individual => assembler
            .assemble_individual(frames)
            .map(|tracks| AssembledAudio::Placed { layout, tracks }),
    };
    match assembled {
        Ok(audio) => audio,
        Err(e) => {
            warn!(error = %e, "Audio assembly failed, exporting without audio");
            AssembledAudio::None
        }
    }
}

fn write_movie(
    frames: &[Frame],
    settings: &ExportSettings,
    output: &Path,
    audio: &AssembledAudio,
    rasterizer: &mut dyn FrameRasterizer,
    on_progress: &mut dyn FnMut(ExportProgress),
) -> ExportResult<()> {
    // Same directory as the output so the final rename stays on one filesystem
    let staged = tempfile::Builder::new()
        .prefix(".reel-")
        .suffix(".mov.part")
        .tempfile_in(output_dir(output))?;
    debug!(staging = %staged.path().display(), "Writing movie to staging file");

    let mut writer = MovWriter::new(BufWriter::new(staged))?;
    audio.add_to(&mut writer)?;

    let total = frames.len();
    for (index, frame) in frames.iter().enumerate() {
        if frame.duration_ms == 0 {
            debug!(frame = frame.sequence_id, "Skipping zero-length frame");
            continue;
        }
        let picture = rasterizer.render(frame)?;
        writer.add_video_frame(frame.duration_ms, &picture)?;
        on_progress(ExportProgress::FrameWritten {
            frame: index,
            total,
        });
    }

    let staged = writer
        .close(settings.write_remaining_audio)?
        .into_inner()
        .map_err(|e| e.into_error())?;
    staged.persist(output).map_err(|e| e.error)?;
    Ok(())
}
