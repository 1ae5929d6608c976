use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use log::{error, info, LevelFilter};
use nbody_common::{open_store, AxisLimits, ErrorKind, RenderConfig, VisError};
use nbody_visualizer::{assemble_video, render_frames};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Renders N-body snapshot stores into frame images and an MP4 video.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional TOML file with `[frames]` and `[video]` tables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one JPEG per snapshot
    Frames(FramesArgs),
    /// Encode a directory of frames into an MP4
    Video {
        /// Directory holding the frames, read in file-name order
        #[arg(long)]
        frames_dir: Option<PathBuf>,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Render frames, then encode them
    All {
        #[command(flatten)]
        frames: FramesArgs,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Print the header and time range of a snapshot store
    Inspect {
        /// Snapshot store (.bin; .h5 needs a build with `--features hdf5`)
        input: PathBuf,
        /// Print as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct FramesArgs {
    /// Snapshot store (.bin; .h5 needs a build with `--features hdf5`)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Frame directory; deleted and recreated on every run
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Symmetric axis limit in kpc
    #[arg(long)]
    lim: Option<f32>,

    /// Render at most this many snapshots
    #[arg(long)]
    max_frames: Option<usize>,

    /// Marker area per unit figure scale (default 100 / particle count)
    #[arg(long)]
    marker_size: Option<f32>,

    /// Marker color: short name (k, r, ...), CSS name or #rrggbb
    #[arg(long)]
    marker_color: Option<String>,

    /// Canvas height in pixels
    #[arg(long)]
    fig_size: Option<u32>,

    #[arg(long)]
    dpi: Option<f32>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Output video file path (.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frames per second for the output video
    #[arg(long)]
    fps: Option<u32>,

    /// Output size as WIDTHxHEIGHT; frames are resized to it
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<[u32; 2]>,

    /// Target bitrate in bits per second
    #[arg(long)]
    bitrate: Option<u32>,
}

fn parse_resolution(text: &str) -> Result<[u32; 2], String> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", text))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("bad dimension '{}': {}", v, e));
    Ok([parse(w)?, parse(h)?])
}

impl FramesArgs {
    fn apply(&self, config: &mut RenderConfig) {
        let frames = &mut config.frames;
        if let Some(input) = &self.input {
            frames.input = Some(input.clone());
        }
        if let Some(dir) = &self.frames_dir {
            frames.output_dir = Some(dir.clone());
        }
        if let Some(lim) = self.lim {
            frames.lim = AxisLimits::Symmetric(lim);
        }
        if let Some(max_frames) = self.max_frames {
            frames.max_frames = Some(max_frames);
        }
        if let Some(size) = self.marker_size {
            frames.marker_size = Some(size);
        }
        if let Some(color) = &self.marker_color {
            frames.marker_color = color.clone();
        }
        if let Some(fig_size) = self.fig_size {
            frames.fig_size = fig_size;
        }
        if let Some(dpi) = self.dpi {
            frames.dpi = dpi;
        }
    }
}

impl EncodeArgs {
    fn apply(&self, config: &mut RenderConfig) {
        let video = &mut config.video;
        if let Some(output) = &self.output {
            video.output = output.clone();
        }
        if let Some(fps) = self.fps {
            video.fps = fps;
        }
        if self.resolution.is_some() {
            video.resolution = self.resolution;
        }
        if let Some(bitrate) = self.bitrate {
            video.bitrate_bps = bitrate;
        }
    }
}

#[derive(Serialize, Debug)]
struct StoreReport {
    path: PathBuf,
    particle_count: usize,
    snapshot_count: usize,
    first_time: Option<f64>,
    last_time: Option<f64>,
}

fn main() -> ExitCode {
    Builder::new().filter_level(LevelFilter::Info).parse_default_env().init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e.chain().find_map(|cause| cause.downcast_ref::<VisError>()).map(VisError::kind);
            error!("{:#}", e);
            match kind {
                Some(ErrorKind::Input) => ExitCode::from(1),
                Some(ErrorKind::Configuration) => ExitCode::from(2),
                Some(ErrorKind::Resource) | None => ExitCode::from(3),
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RenderConfig::load(path)?
        }
        None => RenderConfig::default(),
    };

    match cli.command {
        Command::Frames(args) => {
            args.apply(&mut config);
            run_frames(&config).map(|_| ())
        }
        Command::Video { frames_dir, encode } => {
            encode.apply(&mut config);
            let frames_dir = frames_dir.unwrap_or_else(|| default_video_frames_dir(&config));
            assemble_video(&frames_dir, &config.video.output, &config.video)?;
            Ok(())
        }
        Command::All { frames, encode } => {
            frames.apply(&mut config);
            encode.apply(&mut config);
            config.validate()?;
            let frames_dir = run_frames(&config)?;
            assemble_video(&frames_dir, &config.video.output, &config.video)?;
            Ok(())
        }
        Command::Inspect { input, json } => inspect(&input, json),
    }
}

/// Renders the configured store and returns the frame directory.
fn run_frames(config: &RenderConfig) -> Result<PathBuf> {
    let input = config
        .frames
        .input
        .clone()
        .ok_or_else(|| VisError::config("no snapshot store given; pass --input or set frames.input"))?;
    let frames_dir = config.frames.frames_dir(&input);
    info!("Rendering {} into {}", input.display(), frames_dir.display());
    let summary = render_frames(&input, &frames_dir, &config.frames)?;
    info!(
        "Wrote {} frames to {} in {:.2} s",
        summary.frames_written,
        summary.output_dir.display(),
        summary.elapsed.as_secs_f64()
    );
    Ok(summary.output_dir)
}

fn default_video_frames_dir(config: &RenderConfig) -> PathBuf {
    if let Some(dir) = &config.video.frames_dir {
        return dir.clone();
    }
    match &config.frames.input {
        Some(input) => config.frames.frames_dir(input),
        None => config.frames.output_dir.clone().unwrap_or_else(|| PathBuf::from("frames")),
    }
}

fn inspect(input: &Path, json: bool) -> Result<()> {
    let mut store = open_store(input)?;
    let header = store.header();
    let (first_time, last_time) = match header.snapshot_count {
        0 => (None, None),
        n => (Some(store.read(0)?.time), Some(store.read(n - 1)?.time)),
    };
    let report = StoreReport {
        path: input.to_path_buf(),
        particle_count: header.particle_count,
        snapshot_count: header.snapshot_count,
        first_time,
        last_time,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("store:      {}", report.path.display());
        println!("particles:  {}", report.particle_count);
        println!("snapshots:  {}", report.snapshot_count);
        if let (Some(first), Some(last)) = (report.first_time, report.last_time) {
            println!("time range: {} .. {}", first, last);
        }
    }
    Ok(())
}
