use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::core::frame_source::RetirePolicy;
use crate::renderer::scaler::{Requested, DEFAULT_SAMPLES};

pub const DEFAULT_FPS: u32 = 15;
pub const SEEK_STEP_SECS: f64 = 5.0;
/// Frames buffered between the pipe decoder thread and the player.
pub const PIPE_CAPACITY: usize = 120;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "flv", "wmv", "m4v", "mpg", "mpeg", "ts", "3gp", "ogv",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Decided by extension: anything `image` can decode is an image, then
    /// the common video containers.
    pub fn detect(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        // GIFs decode through the image crate but only the first frame would show
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if ext != "gif" && image::ImageFormat::from_path(path).is_ok() {
            return Ok(MediaKind::Image);
        }
        if ext == "gif" || VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(MediaKind::Video);
        }
        bail!("invalid file type: {}", path.display())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FpsChoice {
    Fixed(u32),
    /// Whatever the probe reports.
    Original,
    #[default]
    Default,
}

impl FpsChoice {
    pub fn from_flags(fps: Option<u32>, original: bool) -> Self {
        match (fps, original) {
            (Some(fps), _) => FpsChoice::Fixed(fps.max(1)),
            (None, true) => FpsChoice::Original,
            (None, false) => FpsChoice::Default,
        }
    }

    pub fn resolve(self, probed: u32) -> u32 {
        match self {
            FpsChoice::Fixed(fps) => fps,
            FpsChoice::Original => probed.max(1),
            FpsChoice::Default => DEFAULT_FPS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// Bitmap files in the temp directory.
    #[default]
    Files,
    /// Raw frames over a pipe into memory.
    Pipe,
}

/// Resolved runtime settings for one `play` invocation.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub input: PathBuf,
    pub requested: Requested,
    pub fps: FpsChoice,
    pub samples: u32,
    pub sound: bool,
    pub info_bar: bool,
    pub retire: RetirePolicy,
    pub decode: DecodeMode,
    pub tmp_dir: PathBuf,
    pub seek_step: f64,
}

impl PlayerConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            requested: Requested::default(),
            fps: FpsChoice::default(),
            samples: DEFAULT_SAMPLES,
            sound: true,
            info_bar: true,
            retire: RetirePolicy::default(),
            decode: DecodeMode::default(),
            tmp_dir: default_tmp_dir(),
            seek_step: SEEK_STEP_SECS,
        }
    }
}

/// Parent of the per-process workspace directory.
pub fn default_tmp_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}
