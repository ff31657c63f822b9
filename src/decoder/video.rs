use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::frame_data::FrameData;
use crate::config::DEFAULT_FPS;
use crate::core::frame_source::ProducerState;
use crate::renderer::FrameBuffer;

/// Audio track written next to the frames.
pub const AUDIO_FILE: &str = "audio.wav";
/// Extension of the frame files the decoder writes.
pub const FRAME_EXTENSION: &str = "bmp";

const CHILD_POLL: Duration = Duration::from_millis(20);

/// Stream properties probed once before playback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Seconds. `None` for sources without a known length.
    pub duration: Option<f64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn ensure_ffmpeg() -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("ffmpeg is not installed")?;
    if !status.success() {
        bail!("ffmpeg is not installed (ffmpeg -version exited with {})", status);
    }
    Ok(())
}

/// Reads size, frame rate and duration of the first video stream with ffprobe.
pub fn probe(input: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,r_frame_rate:format=duration"])
        .args(["-of", "json"])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .context("failed to run ffprobe (is ffmpeg installed?)")?;

    if !output.status.success() {
        bail!(
            "failed to open {}: {}",
            input.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let info = parse_probe(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("unexpected ffprobe output for {}", input.display()))?;

    log::info!(
        "video info: {}x{}, fps = {}, duration = {:?}",
        info.width,
        info.height,
        info.fps,
        info.duration
    );
    Ok(info)
}

pub fn parse_probe(json: &str) -> Result<VideoInfo> {
    let parsed: ProbeOutput = serde_json::from_str(json).context("invalid ffprobe json")?;

    let stream = parsed.streams.first().context("no video stream found")?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => bail!("video stream has no dimensions"),
    };

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .map(|rate| (rate.round() as u32).max(1))
        .unwrap_or(DEFAULT_FPS);

    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration,
    })
}

/// "30000/1001" or "25"
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Writes `<dir>/audio.wav`. Runs to completion before the frame decoder
/// starts. `None` when the input has no usable audio.
///
/// Raising `cancel` kills ffmpeg and yields `None`.
pub fn extract_audio(input: &Path, dir: &Path, cancel: &AtomicBool) -> Result<Option<PathBuf>> {
    let target = dir.join(AUDIO_FILE);
    log::info!("extracting audio: {} -> {}", input.display(), target.display());

    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(input)
        .args(["-vn", "-f", "wav"])
        .arg(&target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn ffmpeg for audio")?;

    let Some(status) = wait_or_kill(&mut child, cancel)? else {
        log::info!("audio extraction cancelled");
        return Ok(None);
    };
    if status.success() && target.exists() {
        Ok(Some(target))
    } else {
        log::warn!("audio extraction failed ({}), playing without sound", status);
        Ok(None)
    }
}

/// Waits for `child` to exit, killing it if `cancel` is raised first.
fn wait_or_kill(child: &mut Child, cancel: &AtomicBool) -> Result<Option<ExitStatus>> {
    loop {
        if cancel.load(Ordering::SeqCst) {
            if let Err(e) = child.kill() {
                log::debug!("kill failed: {}", e);
            }
            let _ = child.wait();
            return Ok(None);
        }
        if let Some(status) = child.try_wait().context("failed to wait for ffmpeg")? {
            return Ok(Some(status));
        }
        thread::sleep(CHILD_POLL);
    }
}

fn forward_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            if line.contains("rror") {
                log::warn!("[ffmpeg] {}", line);
            } else {
                log::debug!("[ffmpeg] {}", line);
            }
        }
    })
}

fn frame_filter(fps: u32, width: u32, height: u32) -> String {
    format!("fps={},scale={}:{}", fps, width, height)
}

/// ffmpeg child writing `frame<N>.bmp` files into the frame directory.
///
/// Its exit is the end-of-stream signal for the directory frame source.
/// Dropping it kills the process.
pub struct FrameDecoder {
    child: Child,
    exited: bool,
}

impl FrameDecoder {
    pub fn spawn(input: &Path, dir: &Path, fps: u32, width: u32, height: u32) -> Result<Self> {
        let pattern = dir.join(format!("frame%d.{}", FRAME_EXTENSION));
        let filter = frame_filter(fps, width, height);
        log::info!(
            "video command: ffmpeg -i {} -vf \"{}\" -start_number 1 {}",
            input.display(),
            filter,
            pattern.display()
        );

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(input)
            .args(["-vf", filter.as_str(), "-start_number", "1"])
            .arg(&pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg")?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }

        Ok(Self { child, exited: false })
    }
}

impl ProducerState for FrameDecoder {
    fn finished(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::info!("frame decoder exited: {}", status);
                self.exited = true;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("lost track of frame decoder: {}", e);
                self.exited = true;
            }
        }
        self.exited
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        if !self.exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// ffmpeg child streaming raw `rgb24` frames over a pipe, turned into
/// `FrameData` on a reader thread and queued on a bounded channel.
///
/// The channel disconnects when ffmpeg closes its output.
pub struct PipeDecoder {
    child: Child,
    _worker: JoinHandle<()>,
}

impl PipeDecoder {
    pub fn spawn(
        input: &Path,
        fps: u32,
        width: u32,
        height: u32,
        capacity: usize,
    ) -> Result<(Self, Receiver<FrameData>)> {
        let filter = frame_filter(fps, width, height);
        log::info!("pipe command: ffmpeg -i {} -vf \"{}\" -f rawvideo -pix_fmt rgb24 pipe:", input.display(), filter);

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(input)
            .args(["-vf", filter.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg")?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }
        let stdout = child.stdout.take().context("ffmpeg stdout not available - pipe failed")?;

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let worker = thread::Builder::new()
            .name("tmv-pipe-decoder".to_owned())
            .spawn(move || read_frames(stdout, width, height, sender))
            .context("failed to spawn decoder thread")?;

        Ok((Self { child, _worker: worker }, receiver))
    }
}

fn read_frames(mut stdout: impl Read, width: u32, height: u32, sender: Sender<FrameData>) {
    let frame_size = width as usize * height as usize * 3;
    let mut buffer = vec![0u8; frame_size];
    let mut index = 0u64;

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                log::error!("failed to read from ffmpeg: {}", e);
                break;
            }
        }

        index += 1;
        let frame = match FrameBuffer::from_rgb(width, height, &buffer) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("bad frame {}: {:#}", index, e);
                break;
            }
        };
        if sender.send(FrameData::new(index, frame)).is_err() {
            break; // Receiver dropped
        }
    }
    log::info!("pipe decoder finished after {} frames", index);
}

impl Drop for PipeDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
