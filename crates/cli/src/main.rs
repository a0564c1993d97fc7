use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reel_audio::Decoders;
use reel_common::{AudioLayout, Narrative, SampleRateSetting};
use reel_export::{ExportJob, ExportProgress, JpegRasterizer};

#[derive(Parser, Debug)]
#[command(name = "reel", version, about = "Export narratives to QuickTime movies")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a narrative manifest to a .mov file.
    Export(ExportArgs),
    /// Print the atom tree and track tables of a movie.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Narrative manifest JSON.
    #[arg(long)]
    manifest: PathBuf,

    /// Output movie path.
    #[arg(long)]
    out: PathBuf,

    /// Override the manifest's audio layout.
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    /// Override the manifest's sample rate (Hz).
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Stop at the last frame instead of writing trailing audio.
    #[arg(long, default_value_t = false)]
    hard_stop: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Movie to inspect.
    path: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LayoutArg {
    Combined,
    Segmented,
    Individual,
}

impl From<LayoutArg> for AudioLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Combined => AudioLayout::Combined,
            LayoutArg::Segmented => AudioLayout::Segmented,
            LayoutArg::Individual => AudioLayout::Individual,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.cmd {
        Command::Export(args) => cmd_export(args),
        Command::Inspect(args) => cmd_inspect(args),
    }
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let mut narrative = Narrative::from_path(&args.manifest)
        .with_context(|| format!("load manifest '{}'", args.manifest.display()))?;
    if let Some(layout) = args.layout {
        narrative.settings.audio_layout = layout.into();
    }
    if let Some(hz) = args.sample_rate {
        narrative.settings.sample_rate = SampleRateSetting::Fixed(hz);
    }
    if args.hard_stop {
        narrative.settings.write_remaining_audio = false;
    }

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    let rasterizer = Box::new(JpegRasterizer::from_settings(&narrative.settings));
    let job = ExportJob::spawn(narrative, args.out.clone(), Decoders::standard(), rasterizer)
        .context("start export")?;

    while let Some(update) = job.recv_progress() {
        match update {
            ExportProgress::AudioAssembled { tracks } => eprintln!("audio: {tracks} track(s)"),
            ExportProgress::FrameWritten { frame, total } => {
                eprint!("\rframe {}/{}", frame + 1, total);
            }
            ExportProgress::Completed { duration_secs, .. } => {
                eprintln!();
                eprintln!("finished in {duration_secs:.1}s");
            }
            ExportProgress::Started { .. } | ExportProgress::Failed { .. } => {}
        }
    }

    match job
        .wait()
        .with_context(|| format!("export '{}'", args.out.display()))?
    {
        Some(path) => println!("wrote {}", path.display()),
        None => println!("nothing to export"),
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let movie = reel_mux::inspect_file(&args.path)
        .with_context(|| format!("inspect '{}'", args.path.display()))?;
    print!("{movie}");
    Ok(())
}
