use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use framegrab::{
    ExtractOptions, ExtractedFrame, ExtractionSession, FfmpegLogLevel, FrameSelection,
    OperationType, PixelFormat, ProgressCallback, ProgressInfo, StrategyPreference,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const EXAMPLES: &str = "Examples:
  framegrab metadata clip.mp4 --json
  framegrab extract clip.mp4 --out frames --select every:10 --progress
  framegrab snapshot clip.mp4 --at 1:02.5 --out poster.jpg
  framegrab thumbnails clip.mp4 --count 12 --out thumbs --width 320
  framegrab completions bash > framegrab.bash";

#[derive(Debug, Parser)]
#[command(
    name = "framegrab",
    version,
    about = "Pull time-ordered still frames out of video files",
    after_help = EXAMPLES
)]
struct Cli {
    #[command(flatten)]
    flags: Flags,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct Flags {
    /// Report every saved file and the extraction summary.
    #[arg(long, global = true)]
    verbose: bool,

    /// Draw a progress bar on stderr.
    #[arg(long, global = true)]
    progress: bool,

    /// Replace files that already exist.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Verbosity of FFmpeg's own logging.
    #[arg(long, global = true, value_enum)]
    ffmpeg_log: Option<FfmpegVerbosity>,

    #[arg(long, global = true, value_enum, default_value_t = ImageLayout::Rgb)]
    pixels: ImageLayout,

    #[arg(long, global = true, value_enum, default_value_t = Strategy::Auto)]
    strategy: Strategy,

    /// Fail on the first frame that cannot be extracted.
    #[arg(long, global = true)]
    strict: bool,

    /// Seek timeout per frame, in milliseconds.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    frame_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageLayout {
    Rgb,
    Rgba,
    Gray,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Auto,
    Pipeline,
    Seek,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FfmpegVerbosity {
    Quiet,
    Error,
    Warning,
    Info,
    Debug,
}

impl From<ImageLayout> for PixelFormat {
    fn from(layout: ImageLayout) -> Self {
        match layout {
            ImageLayout::Rgb => PixelFormat::Rgb8,
            ImageLayout::Rgba => PixelFormat::Rgba8,
            ImageLayout::Gray => PixelFormat::Gray8,
        }
    }
}

impl From<Strategy> for StrategyPreference {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Auto => StrategyPreference::Auto,
            Strategy::Pipeline => StrategyPreference::PipelineOnly,
            Strategy::Seek => StrategyPreference::SeekOnly,
        }
    }
}

impl From<FfmpegVerbosity> for FfmpegLogLevel {
    fn from(verbosity: FfmpegVerbosity) -> Self {
        match verbosity {
            FfmpegVerbosity::Quiet => FfmpegLogLevel::Quiet,
            FfmpegVerbosity::Error => FfmpegLogLevel::Error,
            FfmpegVerbosity::Warning => FfmpegLogLevel::Warning,
            FfmpegVerbosity::Info => FfmpegLogLevel::Info,
            FfmpegVerbosity::Debug => FfmpegLogLevel::Debug,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print duration, dimensions and frame rate.
    #[command(visible_alias = "probe")]
    Metadata {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Decode the whole video and write the selected frames as images.
    Extract {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// all | every:N | interval:SECONDS | fps:RATE | even
        #[arg(long, default_value = "all", value_parser = parse_selection)]
        select: FrameSelection,
        #[arg(long)]
        max_frames: Option<u64>,
        /// Image file extension; the encoder is chosen from it.
        #[arg(long, default_value = "png")]
        ext: String,
    },

    /// Capture one frame, stepping back when the picture is black.
    Snapshot {
        input: PathBuf,
        /// Seconds, MM:SS or HH:MM:SS, fractions allowed.
        #[arg(long, value_parser = parse_timecode)]
        at: Duration,
        #[arg(long)]
        out: PathBuf,
    },

    /// Write evenly spread frames from the full frame set.
    Thumbnails {
        input: PathBuf,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        count: u64,
        #[arg(long)]
        out: PathBuf,
        /// Height follows the aspect ratio.
        #[arg(long)]
        width: Option<u32>,
        #[arg(long, default_value = "jpg")]
        ext: String,
    },

    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let fields: Vec<&str> = value.split(':').collect();
    if value.is_empty() || fields.len() > 3 {
        return Err(format!("expected seconds or [HH:]MM:SS, got {value:?}"));
    }

    let (whole_units, seconds) = fields.split_at(fields.len() - 1);
    let mut total = 0.0_f64;
    for field in whole_units {
        let unit: u64 = field
            .parse()
            .map_err(|_| format!("{field:?} is not a whole number"))?;
        total = total * 60.0 + unit as f64;
    }
    let seconds: f64 = seconds[0]
        .parse()
        .map_err(|_| format!("{:?} is not a number of seconds", seconds[0]))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("{value:?} is not a valid time"));
    }

    Ok(Duration::from_secs_f64(total * 60.0 + seconds))
}

fn parse_selection(value: &str) -> Result<FrameSelection, String> {
    let value = value.trim().to_ascii_lowercase();
    let invalid = || format!("unrecognised selection {value:?}");

    let selection = match value.split_once(':') {
        None if value == "all" => FrameSelection::All,
        None if value == "even" => FrameSelection::EvenSampling,
        Some(("every", n)) => FrameSelection::EveryNth(n.parse().map_err(|_| invalid())?),
        Some(("interval", s)) => FrameSelection::IntervalSeconds(s.parse().map_err(|_| invalid())?),
        Some(("fps", f)) => FrameSelection::TargetFps(f.parse().map_err(|_| invalid())?),
        _ => return Err(invalid()),
    };
    Ok(selection)
}

impl Flags {
    fn options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::new()
            .with_skip_failed_frames(!self.strict)
            .with_pixel_format(self.pixels.into())
            .with_strategy(self.strategy.into());
        if let Some(millis) = self.frame_timeout_ms {
            options = options.with_frame_timeout(Duration::from_millis(millis));
        }
        options
    }

    fn progress_bar(&self) -> CliResult<Option<Arc<BarProgress>>> {
        self.progress.then(BarProgress::new).transpose().map(|bar| bar.map(Arc::new))
    }

    fn warn(&self, message: String) {
        eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
    }

    /// Fails when `path` exists and `--overwrite` was not given.
    fn claim(&self, path: &Path) -> CliResult {
        match (path.exists(), self.overwrite) {
            (false, _) => Ok(()),
            (true, true) => {
                self.warn(format!("replacing {}", path.display()));
                Ok(())
            }
            (true, false) => {
                Err(format!("{} already exists, pass --overwrite", path.display()).into())
            }
        }
    }

    fn claim_dir(&self, dir: &Path) -> CliResult {
        self.claim(dir)?;
        fs::create_dir_all(dir)?;
        Ok(())
    }
}

struct BarProgress(ProgressBar);

impl BarProgress {
    fn new() -> CliResult<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg:>9} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?
        .progress_chars("=> ");
        Ok(Self(ProgressBar::new(0).with_style(style)))
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.0.set_length(total);
        }
        self.0.set_position(info.current);
        self.0.set_message(match info.operation {
            OperationType::MetadataProbe => "probing",
            OperationType::PipelineDecode => "decoding",
            OperationType::SequentialSeek => "seeking",
            OperationType::Snapshot => "capturing",
            _ => "working",
        });
    }
}

fn write_frames(frames: &[&ExtractedFrame], dir: &Path, ext: &str, flags: &Flags) -> CliResult<usize> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    for (position, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame_{position:06}_{:.3}s.{ext}", frame.time));
        if path.exists() && !flags.overwrite {
            return Err(format!("{} already exists, pass --overwrite", path.display()).into());
        }
        frame.image.save(&path)?;
        if flags.verbose {
            eprintln!("{:>10.3}s  {}", frame.time, path.display());
        }
    }
    Ok(frames.len())
}

fn success(message: String) {
    println!("{} {}", "done:".green().bold(), message.green());
}

async fn run(cli: Cli) -> CliResult {
    let flags = cli.flags;
    if let Some(verbosity) = flags.ffmpeg_log {
        framegrab::set_ffmpeg_log_level(verbosity.into());
    }

    match cli.command {
        Command::Metadata { input, json } => {
            let session = ExtractionSession::open(&input)?.with_options(flags.options());
            let metadata = session.probe_metadata().await?;
            if json {
                let document = json!({
                    "duration_seconds": metadata.duration,
                    "width": metadata.width,
                    "height": metadata.height,
                    "fps": metadata.fps,
                    "total_frames": metadata.total_frames,
                    "frame_rate_source": format!("{:?}", metadata.frame_rate_source),
                });
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                println!("{}", input.display().to_string().bold());
                println!("  duration  {:.3}s", metadata.duration);
                println!("  size      {}x{}", metadata.width, metadata.height);
                println!(
                    "  rate      {:.3} fps ({:?})",
                    metadata.fps, metadata.frame_rate_source
                );
                println!("  frames    {}", metadata.total_frames);
            }
        }
        Command::Extract {
            input,
            out,
            select,
            max_frames,
            ext,
        } => {
            flags.claim_dir(&out)?;
            let session = ExtractionSession::open(&input)?
                .with_options(flags.options().with_max_frames(max_frames));

            let bar = flags.progress_bar()?;
            let observer = bar.clone().map(|bar| bar as Arc<dyn ProgressCallback>);
            let store = session.extract_all_frames(observer).await?;
            if let Some(bar) = bar {
                bar.0.finish_and_clear();
            }

            let written = write_frames(&select.apply(&store)?, &out, &ext, &flags)?;

            let report = store.report();
            if flags.verbose || !report.failed_indices.is_empty() {
                eprintln!(
                    "{} {}/{} frames by {}{}, {:.1}% succeeded",
                    "report:".cyan().bold(),
                    report.extracted,
                    report.expected,
                    report.strategy,
                    if report.fell_back { " (fallback)" } else { "" },
                    report.success_rate()
                );
            }
            success(format!("wrote {written} frame(s) to {}", out.display()));
        }
        Command::Snapshot { input, at, out } => {
            flags.claim(&out)?;
            let session = ExtractionSession::open(&input)?.with_options(flags.options());
            let frame = session.snapshot_at(at.as_secs_f64()).await?;
            frame.image.save(&out)?;
            success(format!("{:.3}s -> {}", frame.time, out.display()));
        }
        Command::Thumbnails {
            input,
            count,
            out,
            width,
            ext,
        } => {
            flags.claim_dir(&out)?;
            let mut options = flags.options().with_resolution(width, None);
            if let Some(bar) = flags.progress_bar()? {
                options = options.with_progress(bar);
            }
            let session = ExtractionSession::open(&input)?.with_options(options);
            let store = session.extract_all_frames(None).await?;
            let written = write_frames(&store.thumbnails(count as usize), &out, &ext, &flags)?;
            success(format!("wrote {written} thumbnail(s) to {}", out.display()));
        }
        Command::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "framegrab",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| -> Box<dyn std::error::Error> {
            format!("cannot start async runtime: {error}").into()
        })
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(error) = outcome {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameSelection, parse_selection, parse_timecode};

    #[test]
    fn selection_syntax() {
        assert_eq!(parse_selection("all"), Ok(FrameSelection::All));
        assert_eq!(parse_selection(" Even "), Ok(FrameSelection::EvenSampling));
        assert_eq!(parse_selection("every:5"), Ok(FrameSelection::EveryNth(5)));
        assert_eq!(
            parse_selection("interval:0.5"),
            Ok(FrameSelection::IntervalSeconds(0.5))
        );
        assert_eq!(parse_selection("fps:12"), Ok(FrameSelection::TargetFps(12.0)));
        assert!(parse_selection("every").is_err());
        assert!(parse_selection("every:x").is_err());
        assert!(parse_selection("keyframes").is_err());
    }

    #[test]
    fn timecode_syntax() {
        assert_eq!(parse_timecode("75").unwrap().as_secs(), 75);
        assert_eq!(parse_timecode("01:15").unwrap().as_secs(), 75);
        assert_eq!(parse_timecode("1:01:15.5").unwrap().as_millis(), 3_675_500);
        assert!(parse_timecode("").is_err());
        assert!(parse_timecode("-3").is_err());
        assert!(parse_timecode("1:2:3:4").is_err());
        assert!(parse_timecode("a:10").is_err());
    }
}
