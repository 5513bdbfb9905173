//! # Video Scripy - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Caricamento della configurazione e override da CLI
//! - Scansione, ordinamento/selezione della worklist e avvio del processo
//! - Rendering degli eventi (progress bar o righe JSON) e Ctrl-C come stop
//!
//! ## Esempio di utilizzo:
//! ```bash
//! video-scripy --root /videos --depth -1 upscale --factor 4p --quality 3
//! video-scripy --json --only clip.mp4 resize --width -1 --height 720
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use video_scripy::config::{Device, VideoCodec};
use video_scripy::file_manager::FileManager;
use video_scripy::platform::PlatformCommands;
use video_scripy::progress::{ConsoleRenderer, RunStats};
use video_scripy::{Config, EventSink, Orchestrator, PipelineParams, SortKey, WorkList};

#[derive(Parser)]
#[command(name = "video-scripy")]
#[command(about = "Batch optimize, resize, upscale, interpolate, preview and remux videos")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Folder to scan (default: current directory)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Sub-folder depth to scan (0 = top level only, -1 = unlimited)
    #[arg(short, long, global = true, allow_hyphen_values = true)]
    depth: Option<i32>,

    /// Configuration file (default: ~/.video-scripy/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output events as JSON lines for programmatic use
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Encode on CPU instead of CUDA
    #[arg(long, global = true, conflicts_with = "gpu")]
    cpu: bool,

    /// Encode on CUDA even if the config says CPU
    #[arg(long, global = true)]
    gpu: bool,

    /// Encode H.264 instead of H.265
    #[arg(long, global = true)]
    h264: bool,

    /// Process only these display names (repeatable)
    #[arg(long, global = true)]
    only: Vec<String>,

    /// Sort the worklist: name, width, height, area, fps, duration, bitrate, filesize
    #[arg(long, global = true)]
    sort: Option<SortKey>,

    /// Reverse the worklist order (after sorting)
    #[arg(long, global = true)]
    reverse: bool,

    /// Write the effective configuration (after CLI overrides) to the config file
    #[arg(long, global = true)]
    save_config: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the external tools can be launched
    CheckTools,
    /// Scan and probe, then list the worklist
    Scan,
    /// Re-encode with a lower bit rate
    Optimize {
        #[arg(short, long, default_value = "3.0")]
        quality: f64,
    },
    /// Shrink to a new size (-1 keeps the aspect ratio)
    Resize {
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        width: i64,
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        height: i64,
        #[arg(short, long, default_value = "3.0")]
        quality: f64,
    },
    /// AI upscale (factor 2, 3, 4, 4p or 4pa)
    Upscale {
        #[arg(short, long, default_value = "2")]
        factor: String,
        #[arg(short, long, default_value = "3.0")]
        quality: f64,
    },
    /// AI frame interpolation to a higher frame rate
    Interpolate {
        #[arg(long, default_value = "30")]
        fps: f64,
        #[arg(short, long, default_value = "3.0")]
        quality: f64,
    },
    /// Grid of still frames per video
    Preview {
        #[arg(long, default_value = "3")]
        columns: u32,
        #[arg(long, default_value = "2")]
        rows: u32,
    },
    /// Remux the selected streams of every selected file into one mkv
    Stream,
}

impl Command {
    fn params(&self) -> Option<PipelineParams> {
        match self {
            Self::CheckTools | Self::Scan => None,
            Self::Optimize { quality } => Some(PipelineParams::Optimize { quality: *quality }),
            Self::Resize {
                width,
                height,
                quality,
            } => Some(PipelineParams::Resize {
                width: *width,
                height: *height,
                quality: *quality,
            }),
            Self::Upscale { factor, quality } => Some(PipelineParams::Upscale {
                factor: factor.clone(),
                quality: *quality,
            }),
            Self::Interpolate { fps, quality } => Some(PipelineParams::Interpolate {
                fps: *fps,
                quality: *quality,
            }),
            Self::Preview { columns, rows } => Some(PipelineParams::Preview {
                columns: *columns,
                rows: *rows,
            }),
            Self::Stream => Some(PipelineParams::Stream),
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for JSON events
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_worklist(worklist: &WorkList, json: bool) {
    if json {
        let files: Vec<serde_json::Value> = worklist
            .records()
            .iter()
            .map(|r| {
                let info = r.info.as_ref();
                serde_json::json!({
                    "name": r.name,
                    "selected": r.selected,
                    "media_type": r.media_type,
                    "width": info.map(|i| i.width),
                    "height": info.map(|i| i.height),
                    "fps": info.map(|i| i.fps),
                    "duration_seconds": info.map(|i| i.duration.as_secs_f64()),
                    "bit_rate": info.map(|i| i.bit_rate),
                    "frame_count": info.map(|i| i.frame_count),
                    "file_size": info.map(|i| i.file_size),
                    "streams": info.map(|i| &i.streams),
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "type": "worklist", "files": files }));
        return;
    }

    let order = worklist.processing_order();
    for record in worklist.records() {
        let prefix = order
            .iter()
            .find(|(_, name)| *name == record.name)
            .map(|(position, _)| format!("{:>3}.", position))
            .unwrap_or_else(|| "    ".to_string());
        match record.info.as_ref() {
            Some(info) if record.is_video() => println!(
                "{} {}  {}x{}  {}fps  {:.1}s  {}  {}",
                prefix,
                record.name,
                info.width,
                info.height,
                info.fps,
                info.duration.as_secs_f64(),
                FileManager::format_bit_rate(info.bit_rate),
                FileManager::format_size(info.file_size)
            ),
            Some(info) => println!(
                "{} {}  {} stream(s)  {}",
                prefix,
                record.name,
                info.streams.len(),
                FileManager::format_size(info.file_size)
            ),
            None => println!("{} {}", prefix, record.name),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::from_file(&config_path).await?;
    if let Some(depth) = args.depth {
        config.scan_depth = depth;
    }
    if args.cpu {
        config.encoder.device = Device::Cpu;
    } else if args.gpu {
        config.encoder.device = Device::Cuda;
    }
    if args.h264 {
        config.encoder.codec = VideoCodec::H264;
    }
    if args.json {
        config.json_output = true;
    }
    config.validate()?;
    if args.save_config {
        config.save_to_file(&config_path).await?;
        info!("Configuration saved to {}", config_path.display());
    }

    let root = match args.root.clone() {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(anyhow::anyhow!("Root directory does not exist: {}", root.display()));
    }
    debug!("System: {:?}", PlatformCommands::system_info());
    info!("Root: {}", root.display());

    let json = config.json_output;
    let (events, mut rx) = EventSink::channel();
    let renderer = tokio::spawn(async move {
        let mut console = ConsoleRenderer::new();
        while let Some(event) = rx.recv().await {
            if json {
                event.emit();
            } else {
                console.handle(&event);
            }
        }
        console.stats().clone()
    });

    let mut orchestrator = Orchestrator::new(root, config, events);
    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping");
            cancel.cancel();
        }
    });

    let mut tool_check = Ok(());
    match args.command.params() {
        None if matches!(args.command, Command::CheckTools) => {
            let report = orchestrator.check_tools().await;
            for status in &report.tools {
                info!(
                    "{}: {} ({})",
                    status.tool,
                    if status.available { "found" } else { "missing" },
                    status.program
                );
            }
            tool_check = report.ensure_available();
        }
        params => {
            let scan = orchestrator.scan(None).await;
            info!("{} of {} file(s) ready", scan.probed, scan.found);

            let worklist = orchestrator.worklist_mut();
            if let Some(key) = args.sort {
                worklist.sort_by(key);
            }
            if args.reverse {
                worklist.reverse();
            }
            if !args.only.is_empty() {
                worklist.select_only(&args.only);
            }

            match params {
                None => print_worklist(orchestrator.worklist(), json),
                Some(params) => {
                    let summary = orchestrator.run(params).await;
                    if summary.stopped {
                        warn!("Process {} stopped", summary.kind);
                    }
                }
            }
        }
    }

    // closing the sink ends the renderer
    drop(orchestrator);
    let stats = match renderer.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Event renderer failed: {}", e);
            RunStats::default()
        }
    };
    if stats.files_processed > 0 && !json {
        info!("{}", stats.format_summary());
    }

    tool_check?;
    Ok(())
}
