mod config;
mod core;
mod decoder;
mod renderer;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{DecodeMode, FpsChoice, MediaKind, PlayerConfig};
use crate::core::frame_source::RetirePolicy;
use crate::core::player::EndReason;
use crate::core::viewer;
use crate::renderer::scaler::DEFAULT_SAMPLES;
use crate::renderer::Requested;
use crate::utils::{logger, terminal};

#[derive(Parser)]
#[command(name = "tmv", author, version, about = "View images and videos in a truecolor terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show an image or play a video (type detected from the extension)
    Play {
        input: PathBuf,
        /// Output width in pixels (one pixel per column)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        width: Option<u32>,
        /// Output height in pixels (two pixels per row)
        #[arg(short = 'H', long, value_parser = clap::value_parser!(u32).range(1..))]
        height: Option<u32>,
        /// Playback frame rate [default: 15]
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        fps: Option<u32>,
        /// Use the video's own frame rate
        #[arg(short = 'F', long)]
        orig_fps: bool,
        #[arg(short = 's', long)]
        no_sound: bool,
        /// Hide the time and progress line
        #[arg(short = 'i', long)]
        no_info: bool,
        /// Samples per axis when resampling (1 = nearest neighbour)
        #[arg(long, default_value_t = DEFAULT_SAMPLES, value_parser = clap::value_parser!(u32).range(1..))]
        samples: u32,
        /// Keep decoded frames until exit so seeking back shows them again
        #[arg(long)]
        keep_frames: bool,
        /// Decode into memory through a pipe instead of frame files
        #[arg(long)]
        pipe: bool,
        /// Directory under which a private temp directory for frames and audio is created
        #[arg(long)]
        tmp_dir: Option<PathBuf>,
    },
    /// Print the probed video properties as JSON
    Probe { input: PathBuf },
    /// Query the terminal size as crossterm sees it
    TerminalSize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init()?;

    match cli.command {
        Commands::Play {
            input,
            width,
            height,
            fps,
            orig_fps,
            no_sound,
            no_info,
            samples,
            keep_frames,
            pipe,
            tmp_dir,
        } => {
            let mut config = PlayerConfig::new(input);
            config.requested = Requested { width, height };
            config.fps = FpsChoice::from_flags(fps, orig_fps);
            config.samples = samples;
            config.sound = !no_sound;
            config.info_bar = !no_info;
            config.retire = if keep_frames { RetirePolicy::Keep } else { RetirePolicy::Delete };
            config.decode = if pipe { DecodeMode::Pipe } else { DecodeMode::Files };
            if let Some(dir) = tmp_dir {
                config.tmp_dir = dir;
            }
            play(&config)?;
        }
        Commands::Probe { input } => {
            crate::decoder::video::ensure_ffmpeg()?;
            let info = crate::decoder::video::probe(&input)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::TerminalSize => {
            let grid = terminal::grid_size()?;
            let (pixel_width, pixel_height) = grid.pixel_area(false);
            println!(
                "{}",
                json!({
                    "columns": grid.columns,
                    "rows": grid.rows,
                    "raw_columns": grid.raw_columns,
                    "raw_rows": grid.raw_rows,
                    "pixel_width": pixel_width,
                    "pixel_height": pixel_height,
                })
            );
        }
    }

    Ok(())
}

fn play(config: &PlayerConfig) -> Result<()> {
    match MediaKind::detect(&config.input)? {
        MediaKind::Image => viewer::view_image(config),
        MediaKind::Video => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::SeqCst);
            })
            .context("Error registering Ctrl-C handler")?;

            let report = viewer::play_video(config, shutdown)?;
            log::info!(
                "{} frames painted, {} skipped, ended by {:?}",
                report.frames_painted,
                report.frames_skipped,
                report.end
            );
            if report.end == EndReason::EndOfStream && report.frames_painted == 0 {
                anyhow::bail!("no frames could be decoded from {}", config.input.display());
            }
            Ok(())
        }
    }
}
