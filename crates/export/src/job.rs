//! Background export job.
//!
//! Runs [`export_mov`] on a dedicated `export-job` thread and reports
//! progress over a crossbeam channel so a front end can show a progress bar.

use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::info;

use reel_audio::Decoders;
use reel_common::Narrative;

use crate::error::{ExportError, ExportResult};
use crate::pipeline::{export_mov, ExportProgress};
use crate::rasterizer::FrameRasterizer;

/// Handle for monitoring an export running on its own thread.
#[derive(Debug)]
pub struct ExportJob {
    progress_rx: Receiver<ExportProgress>,
    thread: JoinHandle<ExportResult<Option<PathBuf>>>,
    output: PathBuf,
}

impl ExportJob {
    /// Validate the settings and start exporting on a new thread.
    pub fn spawn(
        narrative: Narrative,
        output: PathBuf,
        decoders: Decoders,
        mut rasterizer: Box<dyn FrameRasterizer>,
    ) -> ExportResult<Self> {
        narrative.settings.validate()?;
        let (progress_tx, progress_rx) = channel::unbounded::<ExportProgress>();

        let job_output = output.clone();
        let thread = std::thread::Builder::new()
            .name("export-job".to_string())
            .spawn(move || {
                run_export(
                    &narrative,
                    job_output,
                    &decoders,
                    rasterizer.as_mut(),
                    progress_tx,
                )
            })
            .map_err(|e| ExportError::InitFailed(format!("Failed to spawn export thread: {e}")))?;

        Ok(Self {
            progress_rx,
            thread,
            output,
        })
    }

    /// Try to receive the latest progress update (non-blocking).
    pub fn try_recv_progress(&self) -> Option<ExportProgress> {
        self.progress_rx.try_recv().ok()
    }

    /// Wait for the next progress update (blocking). `None` once the job
    /// has finished and every update has been received.
    pub fn recv_progress(&self) -> Option<ExportProgress> {
        self.progress_rx.recv().ok()
    }

    /// Drain all pending progress updates.
    pub fn drain_progress(&self) -> Vec<ExportProgress> {
        self.progress_rx.try_iter().collect()
    }

    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the export finishes and return its result.
    pub fn wait(self) -> ExportResult<Option<PathBuf>> {
        self.thread.join().map_err(|_| ExportError::Panicked)?
    }
}

fn run_export(
    narrative: &Narrative,
    output: PathBuf,
    decoders: &Decoders,
    rasterizer: &mut dyn FrameRasterizer,
    progress_tx: Sender<ExportProgress>,
) -> ExportResult<Option<PathBuf>> {
    let start = Instant::now();
    // A dropped receiver only means nobody is watching
    let mut report = |p: ExportProgress| {
        let _ = progress_tx.send(p);
    };
    let result = export_mov(narrative, &output, decoders, rasterizer, &mut report);
    match &result {
        Ok(path) => report(ExportProgress::Completed {
            output: path.clone(),
            duration_secs: start.elapsed().as_secs_f64(),
        }),
        Err(e) => report(ExportProgress::Failed {
            error: e.to_string(),
        }),
    }
    info!(output = %output.display(), ok = result.is_ok(), "Export job finished");
    result
}
