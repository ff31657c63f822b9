use anyhow::{anyhow, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the player needs from an audio track to keep it in step with video.
pub trait AudioTrack {
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    /// Restart the track at `position` seconds.
    fn seek_to(&mut self, position: f64) -> Result<()>;
    fn stop(&mut self);
}

/// Plays the extracted `audio.wav` on the default output device.
///
/// The output stream must stay alive for as long as anything plays, so it
/// is kept here next to the sink.
pub struct AudioManager {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    path: PathBuf,
    paused: bool,
}

impl AudioManager {
    pub fn open(path: &Path) -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| anyhow!("no audio output device: {}", e))?;
        // Fail here rather than mid-playback if the file is unusable
        open_decoder(path)?;
        log::info!("audio ready: {}", path.display());
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
            path: path.to_path_buf(),
            paused: false,
        })
    }

    fn play_from(&mut self, position: Duration) -> Result<()> {
        if let Some(old) = self.sink.take() {
            old.stop();
        }
        let sink = Sink::try_new(&self.handle).map_err(|e| anyhow!("failed to create audio sink: {}", e))?;
        sink.append(open_decoder(&self.path)?.skip_duration(position));
        if self.paused {
            sink.pause();
        }
        self.sink = Some(sink);
        Ok(())
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Decoder::new(BufReader::new(file)).map_err(|e| anyhow!("failed to decode {}: {}", path.display(), e))
}

impl AudioTrack for AudioManager {
    fn start(&mut self) -> Result<()> {
        self.paused = false;
        self.play_from(Duration::ZERO)
    }

    fn pause(&mut self) {
        self.paused = true;
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        self.paused = false;
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn seek_to(&mut self, position: f64) -> Result<()> {
        log::debug!("audio seek to {:.2}s", position);
        self.play_from(Duration::from_secs_f64(position.max(0.0)))
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_fails() {
        // Either the device or the file check fails; neither may panic
        let dir = tempfile::tempdir().unwrap();
        assert!(AudioManager::open(&dir.path().join("audio.wav")).is_err());
    }
}
