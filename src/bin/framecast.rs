use std::{
    fs,
    future::Future,
    io::IsTerminal,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framecast::{
    ClipGenerator, CredentialStore, ExtractionOptions, FfmpegLogLevel, FfmpegOpener, Frame,
    FrameExtractor, GeminiClient, GenerationItem, GenerationOptions, ItemStatus, MediaOpener,
    MediaSource, OperationType, ProgressCallback, ProgressInfo, RetryPolicy, RunOutcome,
    SettlePolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const CLI_AFTER_HELP: &str = "Examples:\n  framecast probe input.mp4 --json\n  framecast extract input.mkv --out frames --interval 5 --progress\n  framecast generate input.mp4 --out clips --poll-secs 10 --max-polls 60\n  framecast completions zsh > _framecast";

#[derive(Debug, Parser)]
#[command(
    name = "framecast",
    version,
    about = "Extract frames and subtitles from a video and turn each frame into a generated clip",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print metadata for a media file.
    #[command(
        about = "Print media metadata",
        visible_alias = "info",
        after_help = "Examples:\n  framecast probe input.mp4\n  framecast probe input.mkv --json"
    )]
    Probe {
        /// Input media path.
        input: PathBuf,

        /// Output metadata as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract frames and subtitles to an output directory.
    #[command(
        about = "Extract frames and subtitles",
        after_help = "Examples:\n  framecast extract input.mp4 --out frames\n  framecast extract input.mkv --out frames --interval 2.5 --quality 80 --settle-ms 1000"
    )]
    Extract {
        /// Input media path.
        input: PathBuf,
        #[command(flatten)]
        extract: ExtractArgs,
        /// Print a JSON summary instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Extract frames, then generate one clip per frame.
    #[command(
        about = "Generate clips from extracted frames",
        after_help = "Examples:\n  GEMINI_API_KEY=... framecast generate input.mp4 --out clips\n  framecast generate input.mp4 --out clips --interval 10 --retries 2 --max-polls 60"
    )]
    Generate {
        /// Input media path.
        input: PathBuf,
        #[command(flatten)]
        extract: ExtractArgs,
        /// Seconds between two status polls of a generation job.
        #[arg(long, default_value_t = 10)]
        poll_secs: u64,
        /// Give up on a job after this many polls.
        #[arg(long)]
        max_polls: Option<u32>,
        /// Retry a failed description or generation step this many times.
        #[arg(long, default_value_t = 0)]
        retries: u32,
        /// Gemini API key.
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, clap::Args)]
struct ExtractArgs {
    /// Output directory.
    #[arg(long)]
    out: PathBuf,
    /// Seconds between two sampled frames.
    #[arg(long, default_value_t = 5.0)]
    interval: f64,
    /// JPEG quality (1-100).
    #[arg(long, default_value_t = framecast::DEFAULT_JPEG_QUALITY)]
    quality: u8,
    /// Wait this long for subtitle cues instead of polling until they settle.
    #[arg(long)]
    settle_ms: Option<u64>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "framecast=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global.verbose);

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level
            .parse()
            .map_err(|_| format!("unsupported --log-level: {level}"))?;
        framecast::set_ffmpeg_log_level(parsed);
    } else if global.progress {
        framecast::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    }

    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

/// Checks every clip and the manifest a generation run will write, so a
/// conflict surfaces before any job is submitted.
fn ensure_generation_outputs_writable(
    out: &Path,
    count: usize,
    overwrite: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    for index in 0..count {
        ensure_writable_path(&out.join(clip_file_name(index)), overwrite)?;
    }
    ensure_writable_path(&out.join(MANIFEST_FILE_NAME), overwrite)
}

const MANIFEST_FILE_NAME: &str = "manifest.json";

/// `frame-MM-SS-mmm.jpg`, minutes unbounded. Milliseconds keep sub-second
/// grids from overwriting each other.
fn frame_file_name(timestamp: Duration) -> String {
    let seconds = timestamp.as_secs();
    format!(
        "frame-{:02}-{:02}-{:03}.jpg",
        seconds / 60,
        seconds % 60,
        timestamp.subsec_millis()
    )
}

fn clip_file_name(index: usize) -> String {
    format!("clip-{:02}.mp4", index + 1)
}

fn subtitle_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subtitles".to_string());
    format!("{stem}.vtt")
}

fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "pending",
        ItemStatus::Describing => "describing",
        ItemStatus::Generating => "generating",
        ItemStatus::Complete => "complete",
        ItemStatus::Error => "error",
    }
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::with_template("{msg:>12.cyan.bold} [{bar:40}] {pos:>3}% {elapsed_precise}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        let label = match info.operation {
            OperationType::FrameExtraction => "extracting",
            OperationType::ClipGeneration => "generating",
            _ => "working",
        };
        self.bar.set_message(label);
        self.bar.set_position(info.percentage.round() as u64);
        if info.percentage >= 100.0 {
            self.bar.finish();
        }
    }
}

/// Drive `run` to completion, calling `on_interrupt` on Ctrl-C and then
/// waiting for the run to wind down.
async fn run_interruptible<F, T>(
    run: F,
    on_interrupt: impl FnOnce(),
) -> Result<T, Box<dyn std::error::Error>>
where
    F: Future<Output = Result<T, framecast::FramecastError>>,
{
    let mut run = std::pin::pin!(run);
    tokio::select! {
        result = &mut run => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            on_interrupt();
            let _ = run.await;
            Err("interrupted".into())
        }
    }
}

async fn extract_frames(
    input: &Path,
    args: &ExtractArgs,
    global: &GlobalOptions,
) -> Result<FrameExtractor<FfmpegOpener>, Box<dyn std::error::Error>> {
    let mut options = ExtractionOptions::new().with_jpeg_quality(args.quality);
    if let Some(millis) = args.settle_ms {
        options = options.with_settle_policy(SettlePolicy::fixed(Duration::from_millis(millis)));
    }
    if global.progress {
        options = options.with_progress(Arc::new(TerminalProgress::new()));
    }

    let extractor = FrameExtractor::with_options(FfmpegOpener::new(), options);
    let outcome = run_interruptible(extractor.start(Some(input), args.interval), || {
        extractor.reset()
    })
    .await?;
    if outcome != RunOutcome::Completed {
        return Err(format!("extraction did not complete ({outcome:?})").into());
    }
    Ok(extractor)
}

fn write_frames(
    frames: &[Frame],
    out: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut written = Vec::with_capacity(frames.len());
    for frame in frames {
        let path = out.join(frame_file_name(frame.timestamp()));
        ensure_writable_path(&path, overwrite)?;
        fs::write(&path, frame.image().bytes())?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    index: usize,
    timestamp_seconds: f64,
    frame: String,
    status: &'static str,
    description: Option<String>,
    clip: Option<String>,
    error: Option<String>,
}

fn manifest_entry(index: usize, item: &GenerationItem, clip: Option<&Path>) -> ManifestEntry {
    ManifestEntry {
        index,
        timestamp_seconds: item.frame.timestamp().as_secs_f64(),
        frame: frame_file_name(item.frame.timestamp()),
        status: status_label(item.status),
        description: item.description.clone(),
        clip: clip.map(|path| path.display().to_string()),
        error: item.error.clone(),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Probe { input, json } => {
            let source = runtime.block_on(FfmpegOpener::new().open(&input))?;
            let metadata = source.metadata();
            if json {
                let payload = json!({
                    "format": metadata.format,
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "width": metadata.width,
                    "height": metadata.height,
                    "fps": metadata.frames_per_second,
                    "codec": metadata.codec,
                    "subtitle_tracks": metadata.subtitle_tracks.iter().map(|track| json!({
                        "stream_index": track.stream_index,
                        "codec": track.codec,
                        "language": track.language,
                        "title": track.title,
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Format: {}", metadata.format);
                println!("Duration: {:?}", metadata.duration);
                println!(
                    "Video: {}x{} @ {:.2} fps [{}]",
                    metadata.width, metadata.height, metadata.frames_per_second, metadata.codec,
                );
                for track in &metadata.subtitle_tracks {
                    println!(
                        "Subtitle #{}: {} [{}] {}",
                        track.stream_index,
                        track.language.as_deref().unwrap_or("und"),
                        track.codec,
                        track.title.as_deref().unwrap_or(""),
                    );
                }
            }
        }
        Commands::Extract {
            input,
            extract,
            json,
        } => {
            fs::create_dir_all(&extract.out)?;
            let extractor = runtime.block_on(extract_frames(&input, &extract, &cli.global))?;

            let frames = extractor.frames();
            let written = write_frames(&frames, &extract.out, cli.global.overwrite)?;

            let subtitle_path = match extractor.subtitles() {
                Some(payload) => {
                    let path = extract.out.join(subtitle_file_name(&input));
                    ensure_writable_path(&path, cli.global.overwrite)?;
                    fs::write(&path, payload.as_str())?;
                    Some(path)
                }
                None => None,
            };

            if json {
                let payload = json!({
                    "frames": written.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
                    "subtitles": subtitle_path.as_ref().map(|path| path.display().to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {} frame(s) to {}",
                    "saved".green().bold(),
                    written.len(),
                    extract.out.display()
                );
                match subtitle_path {
                    Some(path) => println!("{} {}", "saved".green().bold(), path.display()),
                    None => println!("{}", "no subtitles found".yellow()),
                }
            }
        }
        Commands::Generate {
            input,
            extract,
            poll_secs,
            max_polls,
            retries,
            api_key,
        } => {
            fs::create_dir_all(&extract.out)?;
            let extractor = runtime.block_on(extract_frames(&input, &extract, &cli.global))?;
            let frames = extractor.frames();
            write_frames(&frames, &extract.out, cli.global.overwrite)?;
            ensure_generation_outputs_writable(
                &extract.out,
                frames.len(),
                cli.global.overwrite,
            )?;

            let credentials = match api_key {
                Some(key) => CredentialStore::with_key(key),
                None => CredentialStore::from_env(),
            }
            .interactive(std::io::stdin().is_terminal());
            let client = GeminiClient::new(credentials.clone());

            let mut options = GenerationOptions::new()
                .with_poll_interval(Duration::from_secs(poll_secs.max(1)))
                .with_retry(RetryPolicy::new(retries));
            if let Some(max_polls) = max_polls {
                options = options.with_max_poll_attempts(max_polls);
            }
            if cli.global.progress {
                options = options.with_progress(Arc::new(TerminalProgress::new()));
            }

            let generator = ClipGenerator::with_options(client.clone(), client, credentials, options);
            runtime.block_on(run_interruptible(generator.start(&frames), || {
                generator.reset()
            }))?;

            let mut manifest = Vec::new();
            for (index, item) in generator.items().iter().enumerate() {
                let clip = if item.status == ItemStatus::Complete {
                    let path = extract.out.join(clip_file_name(index));
                    generator.save_clip(index, &path)?.map(|_| path)
                } else {
                    None
                };

                match (&clip, &item.error) {
                    (Some(path), _) => {
                        println!("{} {}", "saved".green().bold(), path.display())
                    }
                    (None, Some(error)) => eprintln!(
                        "{} item {}: {}",
                        "failed:".red().bold(),
                        index + 1,
                        error
                    ),
                    (None, None) => {}
                }
                manifest.push(manifest_entry(index, item, clip.as_deref()));
            }

            let manifest_path = extract.out.join(MANIFEST_FILE_NAME);
            fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
            println!("{} {}", "saved".green().bold(), manifest_path.display());
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framecast", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_use_minutes_seconds_and_millis() {
        assert_eq!(frame_file_name(Duration::ZERO), "frame-00-00-000.jpg");
        assert_eq!(
            frame_file_name(Duration::from_secs(65)),
            "frame-01-05-000.jpg"
        );
        assert_eq!(
            frame_file_name(Duration::from_millis(3_725_900)),
            "frame-62-05-900.jpg"
        );
    }

    #[test]
    fn sub_second_grid_names_are_distinct() {
        let names: std::collections::HashSet<String> = (0..8)
            .map(|step| frame_file_name(Duration::from_millis(step * 500)))
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains("frame-00-00-500.jpg"));
    }

    #[test]
    fn clip_names_are_one_based() {
        assert_eq!(clip_file_name(0), "clip-01.mp4");
        assert_eq!(clip_file_name(11), "clip-12.mp4");
    }

    #[test]
    fn existing_clip_blocks_generation_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip-02.mp4"), b"old").unwrap();

        let error = ensure_generation_outputs_writable(dir.path(), 3, false).unwrap_err();
        assert!(error.to_string().contains("clip-02.mp4"));
        assert!(ensure_generation_outputs_writable(dir.path(), 3, true).is_ok());
        assert!(ensure_generation_outputs_writable(dir.path(), 1, false).is_ok());
    }

    #[test]
    fn existing_manifest_blocks_generation_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), b"[]").unwrap();

        let error = ensure_generation_outputs_writable(dir.path(), 0, false).unwrap_err();
        assert!(error.to_string().contains(MANIFEST_FILE_NAME));
    }

    #[test]
    fn subtitle_file_uses_input_stem() {
        assert_eq!(subtitle_file_name(Path::new("/videos/talk.mkv")), "talk.vtt");
    }

    #[test]
    fn parse_generate_arguments() {
        let cli = Cli::try_parse_from([
            "framecast",
            "generate",
            "input.mp4",
            "--out",
            "clips",
            "--interval",
            "2.5",
            "--max-polls",
            "30",
            "--retries",
            "2",
            "--api-key",
            "secret",
            "--progress",
        ])
        .unwrap();

        assert!(cli.global.progress);
        match cli.command {
            Commands::Generate {
                input,
                extract,
                poll_secs,
                max_polls,
                retries,
                api_key,
            } => {
                assert_eq!(input, PathBuf::from("input.mp4"));
                assert_eq!(extract.out, PathBuf::from("clips"));
                assert_eq!(extract.interval, 2.5);
                assert_eq!(extract.quality, framecast::DEFAULT_JPEG_QUALITY);
                assert_eq!(poll_secs, 10);
                assert_eq!(max_polls, Some(30));
                assert_eq!(retries, 2);
                assert_eq!(api_key.as_deref(), Some("secret"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn extract_requires_output_directory() {
        assert!(Cli::try_parse_from(["framecast", "extract", "input.mp4"]).is_err());
    }

    #[test]
    fn manifest_entry_reports_item_state() {
        let frame = Frame::new(
            framecast::EncodedImage::jpeg(vec![0xFF, 0xD8], 2, 2),
            Duration::from_secs(5),
        );
        let item = GenerationItem {
            frame,
            description: Some("a harbour at dusk".to_string()),
            artifact: None,
            status: ItemStatus::Error,
            error: Some("Video generation failed: quota".to_string()),
        };
        let entry = manifest_entry(1, &item, None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["frame"], "frame-00-05-000.jpg");
        assert_eq!(json["clip"], serde_json::Value::Null);
        assert_eq!(json["description"], "a harbour at dusk");
    }
}
