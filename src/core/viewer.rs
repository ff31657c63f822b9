use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::audio_manager::{AudioManager, AudioTrack};
use super::frame_source::{ChannelFrameSource, DirFrameSource, FrameSource};
use super::player::{PlaybackReport, Player, PlayerSettings};
use super::session::TerminalSession;
use super::transport::StdinInput;
use crate::config::{DecodeMode, PlayerConfig, PIPE_CAPACITY};
use crate::decoder::video::{self, FRAME_EXTENSION};
use crate::decoder::{FrameDecoder, PipeDecoder};
use crate::renderer::scaler::scaled_dimensions;
use crate::renderer::{get_zoom, scale, DiffRenderer, FrameBuffer, Requested};
use crate::utils::terminal::grid_size;

const MAX_WORKSPACE_ATTEMPTS: u32 = 100;

/// Directory holding the decoded frames and audio of one playback.
///
/// Always a new `tmv-<pid>` directory under `parent`, never one that already
/// existed, so stale frames cannot be picked up and `purge` only ever
/// removes what this process created. Removed by `purge` or on drop,
/// whichever comes first.
pub struct TempWorkspace {
    path: PathBuf,
    purged: bool,
}

impl TempWorkspace {
    pub fn create(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

        let pid = std::process::id();
        for attempt in 0..MAX_WORKSPACE_ATTEMPTS {
            let name = match attempt {
                0 => format!("tmv-{}", pid),
                n => format!("tmv-{}-{}", pid, n),
            };
            let path = parent.join(name);
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    log::info!("temp dir: {}", path.display());
                    return Ok(Self { path, purged: false });
                }
                // Left behind by an earlier process with the same pid
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).with_context(|| format!("failed to create {}", path.display())),
            }
        }
        bail!("no free temp directory name under {}", parent.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn purge(&mut self) {
        if self.purged {
            return;
        }
        self.purged = true;

        let leftover = std::fs::read_dir(&self.path).map(|entries| entries.count()).unwrap_or(0);
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => log::info!("removed {} ({} files left over)", self.path.display(), leftover),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("could not remove {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.purge();
    }
}

/// Shows a still image once and leaves it in the scrollback.
pub fn view_image(config: &PlayerConfig) -> Result<()> {
    log::info!("target image: {}", config.input.display());
    let frame = FrameBuffer::load(&config.input)?;
    let grid = grid_size()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render_image(&mut out, &frame, config.requested, grid.pixel_area(false), grid.rows as u32, config.samples)?;
    Ok(())
}

/// Scrolls `scroll_rows` blank lines, paints the fitted image from the top
/// left and leaves the cursor on the row below it.
pub fn render_image<W: Write>(
    out: &mut W,
    frame: &FrameBuffer,
    requested: Requested,
    window: (u32, u32),
    scroll_rows: u32,
    samples: u32,
) -> Result<(u32, u32)> {
    let (zoom_x, zoom_y) = get_zoom(requested, window, frame.dimensions());
    log::info!(
        "image {}x{}, zoom x: {:.4}, y: {:.4}",
        frame.width(),
        frame.height(),
        zoom_x,
        zoom_y
    );
    let image = scale(frame, zoom_x, zoom_y, samples);
    let (width, height) = image.dimensions();

    out.write_all("\n".repeat(scroll_rows as usize).as_bytes())?;

    let mut renderer = DiffRenderer::new(&mut *out);
    renderer.paint(&image, &FrameBuffer::blank(width, height))?;
    renderer.reset()?;

    write!(out, "\x1b[{};1H", height / 2 + 1)?;
    out.flush()?;
    Ok((width, height))
}

/// Probes, decodes and plays a video until it ends, the user quits or
/// `shutdown` is raised.
///
/// Resources are dropped in reverse order of acquisition: terminal first,
/// then audio, the decoder process and finally the temp directory.
pub fn play_video(config: &PlayerConfig, shutdown: Arc<AtomicBool>) -> Result<PlaybackReport> {
    video::ensure_ffmpeg()?;
    let info = video::probe(&config.input)?;
    if shutdown.load(Ordering::SeqCst) {
        return Ok(PlaybackReport::interrupted());
    }

    let grid = grid_size()?;
    let window = grid.pixel_area(config.info_bar);
    let fps = config.fps.resolve(info.fps);
    let (zoom_x, zoom_y) = get_zoom(config.requested, window, (info.width, info.height));
    let (width, height) = scaled_dimensions((info.width, info.height), zoom_x, zoom_y);
    log::info!(
        "window {}x{}, zoom x: {:.4}, y: {:.4}, decoding at {}x{} @ {} fps",
        window.0,
        window.1,
        zoom_x,
        zoom_y,
        width,
        height,
        fps
    );

    let mut workspace = TempWorkspace::create(&config.tmp_dir)?;

    let audio_path = if config.sound {
        video::extract_audio(&config.input, workspace.path(), &shutdown)?
    } else {
        None
    };
    if shutdown.load(Ordering::SeqCst) {
        workspace.purge();
        return Ok(PlaybackReport::interrupted());
    }
    let audio = audio_path.and_then(|path| match AudioManager::open(&path) {
        Ok(manager) => Some(Box::new(manager) as Box<dyn AudioTrack>),
        Err(e) => {
            log::warn!("playing without sound: {:#}", e);
            None
        }
    });

    let settings = PlayerSettings {
        fps,
        // Frames arrive already at the fitted size
        requested: Requested::default(),
        window: (width, height),
        samples: config.samples,
        info_bar: config.info_bar,
        duration: info.duration,
        seek_step: config.seek_step,
    };

    let mut session = TerminalSession::enter()?;
    let input = StdinInput::spawn()?;

    let report = match config.decode {
        DecodeMode::Files => {
            let decoder = FrameDecoder::spawn(&config.input, workspace.path(), fps, width, height)?;
            let source = DirFrameSource::new(workspace.path(), FRAME_EXTENSION)
                .with_policy(config.retire)
                .with_producer(decoder);
            run_player(settings, source, input, audio, shutdown)
        }
        DecodeMode::Pipe => {
            let (decoder, rx) = PipeDecoder::spawn(&config.input, fps, width, height, PIPE_CAPACITY)?;
            let report = run_player(settings, ChannelFrameSource::new(rx), input, audio, shutdown);
            drop(decoder);
            report
        }
    };

    session.restore()?;
    workspace.purge();
    report
}

fn run_player<S: FrameSource>(
    settings: PlayerSettings,
    source: S,
    input: StdinInput,
    audio: Option<Box<dyn AudioTrack>>,
    shutdown: Arc<AtomicBool>,
) -> Result<PlaybackReport> {
    let mut player = Player::new(settings, source, input, std::io::stdout(), shutdown);
    if let Some(audio) = audio {
        player = player.with_audio(audio);
    }
    player.run()
}
