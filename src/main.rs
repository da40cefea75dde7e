//! # FileForge - Main Entry Point
//!
//! Command line front-end of the conversion engine.
//!
//! ## Responsibilities:
//! - Parses the command line with `clap`
//! - Initialises `tracing` logging on stderr (`--verbose` or `RUST_LOG`)
//! - Loads the configuration file and merges the option flags over it
//! - Binds every subcommand to an engine entry point
//!
//! ## Exit status:
//! Non-zero when any conversion failed or a batch was interrupted. A batch that
//! matches no files prints "no files matched" and succeeds.
//!
//! ## Example:
//! ```bash
//! fileforge batch ./photos ./converted --pattern "*.png" --format jpg --quality 85
//! fileforge convert report.docx report.pdf
//! fileforge pdf merge -o all.pdf a.pdf b.pdf
//! ```

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fileforge::converter::DocumentOperations;
use fileforge::json_output::JsonMessage;
use fileforge::options::{
    AudioQuality, CompressionLevel, Dimensions, DocumentOptions, PageRange, Resolution, VideoQuality,
};
use fileforge::progress::ProgressManager;
use fileforge::tools::Tool;
use fileforge::utils::{format_duration, format_size};
use fileforge::{BatchState, Config, ConversionEngine, ConversionOptions, ConversionResult};

#[derive(Parser)]
#[command(name = "fileforge", version)]
#[command(about = "Convert images, documents, audio and video, one file or a whole tree at a time")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON lines on stdout instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a single file; the output extension selects the format
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Convert every matching file under a directory, mirroring the tree
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,

        /// Glob applied to file names (or relative paths when it contains '/')
        #[arg(short, long)]
        pattern: Option<String>,

        /// Output format; keeps each input's extension when omitted
        #[arg(short, long)]
        format: Option<String>,

        /// Only convert files directly inside the input directory
        #[arg(long)]
        no_recursive: bool,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// List the output formats of every category
    Formats,

    /// Show information about a file
    Info { path: PathBuf },

    /// Report which external tools were found
    Tools,

    /// PDF operations
    Pdf {
        #[command(subcommand)]
        command: PdfCommand,
    },
}

#[derive(Subcommand)]
enum PdfCommand {
    /// Concatenate PDFs in the given order
    Merge {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },

    /// Write one PDF per page
    Split {
        input: PathBuf,
        output_dir: PathBuf,
        /// Pages to extract, e.g. "1-5,10"
        #[arg(long)]
        pages: Option<PageRange>,
    },

    /// Shrink a PDF
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// low, medium or high
        #[arg(long, default_value = "medium")]
        level: CompressionLevel,
    },

    /// Password-protect a PDF (AES-256)
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        password: String,
        /// Defaults to the user password
        #[arg(long)]
        owner_password: Option<String>,
    },

    /// Stamp diagonal text on every page
    Watermark {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        text: String,
        #[arg(long)]
        font_size: Option<f32>,
        /// 0-1
        #[arg(long)]
        opacity: Option<f32>,
        /// Degrees
        #[arg(long, allow_negative_numbers = true)]
        rotation: Option<f32>,
    },
}

/// Conversion flags merged over the configured options
#[derive(Args, Debug, Default)]
struct OptionArgs {
    /// JPEG quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Resize images to WxH
    #[arg(long)]
    resize: Option<Dimensions>,

    /// Limit the longest image side, in pixels
    #[arg(long)]
    max_size: Option<u32>,

    /// Rotate images clockwise by a multiple of 90 degrees
    #[arg(long, allow_negative_numbers = true)]
    rotate: Option<i32>,

    #[arg(long)]
    flip_horizontal: bool,

    #[arg(long)]
    flip_vertical: bool,

    #[arg(long)]
    grayscale: bool,

    /// Drop image and audio metadata
    #[arg(long)]
    strip_metadata: bool,

    /// Password of encrypted input PDFs
    #[arg(long)]
    password: Option<String>,

    /// PDF pages to convert, e.g. "1-5,10"
    #[arg(long)]
    pages: Option<PageRange>,

    /// OCR scanned PDFs before converting
    #[arg(long)]
    ocr: bool,

    /// low, medium, high, lossless or a bitrate such as 256k
    #[arg(long)]
    audio_quality: Option<AudioQuality>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long)]
    channels: Option<u8>,

    /// Loudness-normalise audio
    #[arg(long)]
    normalize: bool,

    /// ultra_low, low, medium, high, ultra_high or a CRF value
    #[arg(long)]
    video_quality: Option<VideoQuality>,

    /// 480p, 720p, 1080p, 1440p, 4k or WxH
    #[arg(long)]
    resolution: Option<Resolution>,

    #[arg(long)]
    fps: Option<f32>,

    /// Target video bitrate, e.g. 2M
    #[arg(long)]
    bitrate: Option<String>,

    /// Drop the audio track of videos
    #[arg(long)]
    no_audio: bool,

    /// Start offset in seconds (audio and video)
    #[arg(long)]
    start: Option<f64>,

    /// Duration in seconds (audio and video)
    #[arg(long)]
    duration: Option<f64>,
}

impl OptionArgs {
    fn apply(self, options: &mut ConversionOptions) {
        let image = &mut options.image;
        if let Some(quality) = self.quality {
            image.quality = quality;
        }
        if self.resize.is_some() {
            image.resize = self.resize;
        }
        if self.max_size.is_some() {
            image.max_size = self.max_size;
        }
        if self.rotate.is_some() {
            image.rotate = self.rotate;
        }
        image.flip_horizontal |= self.flip_horizontal;
        image.flip_vertical |= self.flip_vertical;
        image.grayscale |= self.grayscale;

        let document = &mut options.document;
        if self.password.is_some() {
            document.password = self.password;
        }
        if self.pages.is_some() {
            document.pages = self.pages;
        }
        document.ocr |= self.ocr;

        let audio = &mut options.audio;
        if let Some(quality) = self.audio_quality {
            audio.quality = quality;
        }
        if self.sample_rate.is_some() {
            audio.sample_rate = self.sample_rate;
        }
        if self.channels.is_some() {
            audio.channels = self.channels;
        }
        audio.normalize |= self.normalize;

        let video = &mut options.video;
        if let Some(quality) = self.video_quality {
            video.quality = quality;
        }
        if self.resolution.is_some() {
            video.resolution = self.resolution;
        }
        if self.fps.is_some() {
            video.fps = self.fps;
        }
        if self.bitrate.is_some() {
            video.bitrate = self.bitrate;
        }
        video.remove_audio |= self.no_audio;

        if self.start.is_some() {
            options.audio.start_time = self.start;
            options.video.start_time = self.start;
        }
        if self.duration.is_some() {
            options.audio.duration = self.duration;
            options.video.duration = self.duration;
        }
        if self.strip_metadata {
            options.image.preserve_metadata = false;
            options.audio.preserve_metadata = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so the JSON stream on stdout stays parseable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let json = cli.json;
    match run(cli).await {
        Err(e) if json => {
            JsonMessage::error(e.to_string(), Some(format!("{:#}", e))).emit();
            Ok(ExitCode::FAILURE)
        }
        other => other,
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref()).await?;
    config.json_output |= cli.json;
    let json = config.json_output;

    match cli.command {
        Command::Convert { input, output, options } => {
            let mut merged = config.options.clone();
            options.apply(&mut merged);
            let engine = ConversionEngine::new(config)?;

            let result = engine.convert_file(&input, &output, &merged).await;
            report_file(json, &result);
            Ok(exit_code(result.success))
        }

        Command::Batch {
            input_dir,
            output_dir,
            pattern,
            format,
            no_recursive,
            workers,
            options,
        } => {
            let mut merged = config.options.clone();
            options.apply(&mut merged);
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let engine = ConversionEngine::new(config)?;

            let mut request = engine
                .batch_request(&input_dir, &output_dir)
                .output_format(format.as_deref())
                .options(merged);
            if let Some(pattern) = pattern {
                request = request.pattern(pattern);
            }
            if no_recursive {
                request = request.recursive(false);
            }

            run_batch(&engine, request, json).await
        }

        Command::Formats => {
            let engine = ConversionEngine::new(config)?;
            let conversions = engine.get_supported_conversions();
            if json {
                println!("{}", serde_json::to_string(&conversions)?);
            } else {
                for (category, formats) in &conversions {
                    println!("{:<9} {} -> {}", category, category.extensions().join(" "), formats.join(" "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Info { path } => {
            let engine = ConversionEngine::new(config)?;
            let info = engine.info(&path).await?;
            if json {
                println!("{}", serde_json::to_string(&info)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Tools => {
            let engine = ConversionEngine::new(config)?;
            let tools = engine.tools();
            if json {
                let report: serde_json::Map<String, serde_json::Value> = Tool::ALL
                    .into_iter()
                    .map(|tool| (tool.name().to_string(), serde_json::json!(tools.get(tool))))
                    .collect();
                println!("{}", serde_json::Value::Object(report));
            } else {
                print!("{}", tools.report());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Pdf { command } => {
            let defaults = config.options.document.clone();
            let engine = ConversionEngine::new(config)?;
            run_pdf(engine.documents(), command, defaults, json).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Explicit `--config` must exist; the default location is optional
async fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) if !path.is_file() => {
            return Err(anyhow!("Configuration file does not exist: {}", path.display()));
        }
        Some(path) => Config::from_file(path).await?,
        None => match Config::default_path() {
            Some(path) => Config::from_file(&path).await?,
            None => Config::default(),
        },
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn run_batch(engine: &ConversionEngine, request: fileforge::BatchRequest, json: bool) -> Result<ExitCode> {
    let jobs = engine.plan_batch(&request)?;
    let workers = request.workers.unwrap_or(engine.config().workers);

    if jobs.is_empty() {
        if json {
            JsonMessage::complete(&Default::default(), BatchState::Completed, 0.0).emit();
        } else {
            println!("no files matched");
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        "Converting {} files from {} to {}",
        jobs.len(),
        request.input_dir.display(),
        request.output_dir.display()
    );
    if json {
        JsonMessage::start(request.input_dir.clone(), request.output_dir.clone(), jobs.len(), workers).emit();
    }

    let started = Instant::now();
    let progress = if json {
        ProgressManager::hidden()
    } else {
        ProgressManager::new(jobs.len() as u64)
    };

    let mut handle = engine.spawn_jobs(jobs, workers);
    let control = handle.control();

    let interrupt = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining jobs");
                control.cancel();
            }
        })
    };

    while let Some(update) = handle.progress().recv().await {
        if json {
            JsonMessage::progress(&update).emit();
        } else {
            progress.update(&update);
        }
    }

    let summary = handle.join().await?;
    interrupt.abort();
    let state = control.state();
    let elapsed = started.elapsed().as_secs_f64();

    if json {
        JsonMessage::complete(&summary, state, elapsed).emit();
    } else {
        progress.finish(&summary.format_summary());
        for failure in summary.failures() {
            println!("❌ {}: {}", failure.label(), failure.message);
        }
        if state == BatchState::Cancelled {
            println!("Batch cancelled");
        }
        println!("Done in {}", format_duration(elapsed));
    }

    Ok(exit_code(summary.all_succeeded() && state == BatchState::Completed))
}

async fn run_pdf(docs: &DocumentOperations, command: PdfCommand, defaults: DocumentOptions, json: bool) -> Result<()> {
    match command {
        PdfCommand::Merge { output, inputs } => {
            docs.merge(&inputs, &output).await?;
            report_done(json, &output, format!("Merged {} files into {}", inputs.len(), output.display()));
        }
        PdfCommand::Split {
            input,
            output_dir,
            pages,
        } => {
            let written = docs.split(&input, &output_dir, pages.as_ref()).await?;
            report_done(
                json,
                &output_dir,
                format!("Split {} into {} files", input.display(), written.len()),
            );
        }
        PdfCommand::Compress { input, output, level } => {
            let report = docs.compress(&input, &output, level).await?;
            report_done(
                json,
                &output,
                format!(
                    "Compressed {} -> {} ({:.1}% saved)",
                    format_size(report.original_bytes),
                    format_size(report.compressed_bytes),
                    report.savings_percent()
                ),
            );
        }
        PdfCommand::Encrypt {
            input,
            output,
            password,
            owner_password,
        } => {
            docs.encrypt(&input, &output, &password, owner_password.as_deref()).await?;
            report_done(json, &output, format!("Encrypted {}", output.display()));
        }
        PdfCommand::Watermark {
            input,
            output,
            text,
            font_size,
            opacity,
            rotation,
        } => {
            let mut options = defaults;
            options.font_size = font_size.unwrap_or(options.font_size);
            options.opacity = opacity.unwrap_or(options.opacity);
            options.rotation = rotation.unwrap_or(options.rotation);
            options.validate()?;

            docs.watermark(&input, &output, &text, &options).await?;
            report_done(json, &output, format!("Watermarked {}", output.display()));
        }
    }
    Ok(())
}

fn report_file(json: bool, result: &ConversionResult) {
    if json {
        JsonMessage::file_complete(result).emit();
    } else if result.success {
        println!("✅ {}", result.message);
    } else {
        println!("❌ {}", result.message);
    }
}

fn report_done(json: bool, output: &Path, message: String) {
    if json {
        JsonMessage::FileComplete {
            input: PathBuf::new(),
            output: output.to_path_buf(),
            success: true,
            message,
            error: None,
        }
        .emit();
    } else {
        println!("✅ {}", message);
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
