use anyhow::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thread_priority::{set_current_thread_priority, ThreadPriority};

use super::audio_manager::AudioTrack;
use super::clock::{PlaybackClock, PlaybackState};
use super::frame_source::{FrameSource, FrameStatus};
use super::transport::{Command, InputSource, TransportController};
use crate::renderer::{get_zoom, scale, DiffRenderer, FrameBuffer, InfoBar, Requested};

/// Sleep between polls when there is nothing new to show.
const IDLE: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
pub struct PlayerSettings {
    pub fps: u32,
    pub requested: Requested,
    /// Pixel area frames are fitted into.
    pub window: (u32, u32),
    pub samples: u32,
    pub info_bar: bool,
    pub duration: Option<f64>,
    pub seek_step: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    /// Quit key.
    Quit,
    /// Shutdown flag raised by a signal.
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub frames_painted: u64,
    /// Frames the clock moved past without them being shown.
    pub frames_skipped: u64,
    pub end: EndReason,
}

impl PlaybackReport {
    /// Stopped by a signal before anything was played.
    pub fn interrupted() -> Self {
        Self {
            frames_painted: 0,
            frames_skipped: 0,
            end: EndReason::Interrupted,
        }
    }
}

/// The render loop.
///
/// Each iteration: apply transport commands to the clock, ask the source for
/// the frame the clock wants, fit it to the window and paint the difference
/// against the last painted frame. Owns the output stream for its lifetime.
pub struct Player<S: FrameSource, I: InputSource, W: Write> {
    settings: PlayerSettings,
    source: S,
    input: I,
    renderer: DiffRenderer<W>,
    transport: TransportController,
    audio: Option<Box<dyn AudioTrack>>,
    shutdown: Arc<AtomicBool>,
    info: Option<InfoBar>,
    previous: Option<FrameBuffer>,
    frames_painted: u64,
    frames_skipped: u64,
}

impl<S: FrameSource, I: InputSource, W: Write> Player<S, I, W> {
    pub fn new(settings: PlayerSettings, source: S, input: I, out: W, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            transport: TransportController::new(settings.seek_step),
            settings,
            source,
            input,
            renderer: DiffRenderer::new(out).with_synchronized_updates(true),
            audio: None,
            shutdown,
            info: None,
            previous: None,
            frames_painted: 0,
            frames_skipped: 0,
        }
    }

    pub fn with_audio(mut self, audio: Box<dyn AudioTrack>) -> Self {
        self.audio = Some(audio);
        self
    }

    #[cfg(test)]
    fn into_writer(self) -> W {
        self.renderer.into_inner()
    }

    pub fn run(&mut self) -> Result<PlaybackReport> {
        if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
            log::warn!("failed to raise render thread priority: {:?}", e);
        }

        let end = self.play()?;
        self.renderer.reset()?;
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }

        let report = PlaybackReport {
            frames_painted: self.frames_painted,
            frames_skipped: self.frames_skipped,
            end,
        };
        log::info!("playback finished: {:?}", report);
        Ok(report)
    }

    fn play(&mut self) -> Result<EndReason> {
        let mut deferred = Vec::new();
        let first = match self.wait_for_first_frame(&mut deferred)? {
            Ok(frame) => frame,
            Err(end) => return Ok(end),
        };

        // Decoder start-up does not count as playback time
        let mut clock = PlaybackClock::start();
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.start() {
                log::warn!("audio disabled: {:#}", e);
                self.audio = None;
            }
        }
        self.present(first)?;
        let mut last_index = 1u64;

        for command in deferred {
            if let Some(end) = self.apply(command, &mut clock)? {
                return Ok(end);
            }
        }

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(EndReason::Interrupted);
            }
            while let Some(command) = self.transport.poll(&mut self.input)? {
                if let Some(end) = self.apply(command, &mut clock)? {
                    return Ok(end);
                }
            }

            let time = clock.display_time();
            if let Some(info) = self.info.as_mut() {
                info.draw(self.renderer.writer_mut(), time, self.settings.duration)?;
            }

            let target = clock.frame_index(self.settings.fps);
            if target == last_index {
                thread::sleep(IDLE);
                continue;
            }

            match self.source.next_frame(target)? {
                FrameStatus::Ready(frame) => {
                    if target > last_index + 1 {
                        self.frames_skipped += target - last_index - 1;
                    }
                    self.present(frame)?;
                    last_index = target;
                }
                FrameStatus::Pending => thread::sleep(IDLE),
                FrameStatus::EndOfStream => return Ok(EndReason::EndOfStream),
            }
        }
    }

    /// Polls for frame 1. Commands other than quit are kept for later.
    fn wait_for_first_frame(&mut self, deferred: &mut Vec<Command>) -> Result<Result<FrameBuffer, EndReason>> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(Err(EndReason::Interrupted));
            }
            while let Some(command) = self.transport.poll(&mut self.input)? {
                if command == Command::Quit {
                    return Ok(Err(EndReason::Quit));
                }
                deferred.push(command);
            }

            match self.source.next_frame(1)? {
                FrameStatus::Ready(frame) => return Ok(Ok(frame)),
                FrameStatus::Pending => thread::sleep(IDLE),
                FrameStatus::EndOfStream => {
                    log::warn!("decoder produced no frames");
                    return Ok(Err(EndReason::EndOfStream));
                }
            }
        }
    }

    fn apply(&mut self, command: Command, clock: &mut PlaybackClock) -> Result<Option<EndReason>> {
        match command {
            Command::Quit => return Ok(Some(EndReason::Quit)),
            Command::TogglePause => {
                let state = clock.toggle_pause();
                log::info!("{:?} at {:.2}s", state, clock.display_time());
                if let Some(audio) = self.audio.as_mut() {
                    match state {
                        PlaybackState::Paused => audio.pause(),
                        PlaybackState::Playing => audio.resume(),
                    }
                }
            }
            Command::Seek(delta) => {
                clock.seek(delta);
                let time = clock.display_time();
                log::info!("seek {:+}s -> {:.2}s", delta, time);
                if let Some(audio) = self.audio.as_mut() {
                    if let Err(e) = audio.seek_to(time) {
                        log::warn!("audio seek failed: {:#}", e);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Fits, paints against the previous frame, then makes it the previous frame.
    fn present(&mut self, frame: FrameBuffer) -> Result<()> {
        let (zoom_x, zoom_y) = get_zoom(self.settings.requested, self.settings.window, frame.dimensions());
        let current = if zoom_x == 1.0 && zoom_y == 1.0 {
            frame
        } else {
            scale(&frame, zoom_x, zoom_y, self.settings.samples)
        };

        let (width, height) = current.dimensions();
        let previous = match self.previous.take() {
            Some(previous) if previous.dimensions() == (width, height) => previous,
            stale => {
                if stale.is_some() {
                    log::info!("frame size changed to {}x{}", width, height);
                }
                self.renderer.clear()?;
                if self.settings.info_bar {
                    self.info = Some(InfoBar::new(height / 2 + 1, width));
                }
                FrameBuffer::blank(width, height)
            }
        };

        self.renderer.paint(&current, &previous)?;
        self.previous = Some(current);
        self.frames_painted += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame_source::{DirFrameSource, RetirePolicy};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    fn settings(fps: u32) -> PlayerSettings {
        PlayerSettings {
            fps,
            requested: Requested::default(),
            window: (4, 4),
            samples: 5,
            info_bar: false,
            duration: None,
            seek_step: 5.0,
        }
    }

    fn write_frames(dir: &Path, count: u64) {
        for i in 1..=count {
            let shade = (i * 20) as u8;
            image::RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 255 - shade]))
                .save(dir.join(format!("frame{}.bmp", i)))
                .unwrap();
        }
    }

    /// Records which indices came back `Ready`, and when.
    struct Recording<S> {
        inner: S,
        shown: Arc<Mutex<Vec<(u64, Instant)>>>,
    }

    impl<S: FrameSource> FrameSource for Recording<S> {
        fn next_frame(&mut self, index: u64) -> Result<FrameStatus> {
            let status = self.inner.next_frame(index)?;
            if matches!(status, FrameStatus::Ready(_)) {
                self.shown.lock().unwrap().push((index, Instant::now()));
            }
            Ok(status)
        }
    }

    fn indices(shown: &Mutex<Vec<(u64, Instant)>>) -> Vec<u64> {
        shown.lock().unwrap().iter().map(|(index, _)| *index).collect()
    }

    #[derive(Default, Clone)]
    struct FakeAudio {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl AudioTrack for FakeAudio {
        fn start(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("start".into());
            Ok(())
        }
        fn pause(&mut self) {
            self.calls.lock().unwrap().push("pause".into());
        }
        fn resume(&mut self) {
            self.calls.lock().unwrap().push("resume".into());
        }
        fn seek_to(&mut self, position: f64) -> Result<()> {
            self.calls.lock().unwrap().push(format!("seek {}", position.round()));
            Ok(())
        }
        fn stop(&mut self) {
            self.calls.lock().unwrap().push("stop".into());
        }
    }

    fn finished_source(dir: &Path) -> DirFrameSource {
        DirFrameSource::new(dir, "bmp").with_producer(Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn test_plays_all_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 10);
        let shown = Arc::new(Mutex::new(Vec::new()));
        let source = Recording {
            inner: finished_source(dir.path()),
            shown: shown.clone(),
        };

        let mut player = Player::new(settings(2), source, VecDeque::<u8>::new(), Vec::new(), Arc::new(AtomicBool::new(false)));
        let report = player.run().unwrap();
        let ended = Instant::now();

        assert_eq!(report.end, EndReason::EndOfStream);
        assert_eq!(indices(&shown), (1..=10).collect::<Vec<u64>>());
        assert_eq!(report.frames_painted, 10);
        assert_eq!(report.frames_skipped, 0);

        // Frame n is due at n/2 seconds, except frame 1 which holds from 0
        let shown = shown.lock().unwrap();
        let gaps: Vec<f64> = shown
            .windows(2)
            .map(|pair| pair[1].1.duration_since(pair[0].1).as_secs_f64())
            .collect();
        assert!((gaps[0] - 1.0).abs() < 0.15, "gaps {:?}", gaps);
        for gap in &gaps[1..] {
            assert!((gap - 0.5).abs() < 0.15, "gaps {:?}", gaps);
        }
        // Frame 11 is asked for at 5.5s and is absent
        let tail = ended.duration_since(shown[9].1).as_secs_f64();
        assert!((tail - 0.5).abs() < 0.15, "ended {}s after frame 10", tail);
        for i in 1..=10 {
            assert!(!dir.path().join(format!("frame{}.bmp", i)).exists());
        }

        let out = player.into_writer();
        assert!(out.starts_with(b"\x1b[2J"));
        assert!(out.ends_with(b"\x1b[0m"));
    }

    #[test]
    fn test_quit_key() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let input: VecDeque<u8> = b"q".iter().copied().collect();

        let mut player = Player::new(settings(5), finished_source(dir.path()), input, Vec::new(), Arc::new(AtomicBool::new(false)));
        let report = player.run().unwrap();
        assert_eq!(report.end, EndReason::Quit);
        assert_eq!(report.frames_painted, 0);
    }

    #[test]
    fn test_shutdown_flag_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirFrameSource::new(dir.path(), "bmp").with_producer(Arc::new(AtomicBool::new(false)));

        let mut player = Player::new(settings(5), source, VecDeque::<u8>::new(), Vec::new(), Arc::new(AtomicBool::new(true)));
        assert_eq!(player.run().unwrap().end, EndReason::Interrupted);
    }

    #[test]
    fn test_transport_drives_audio() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let audio = FakeAudio::default();
        // Replayed after frame 1; the seek lands past the last frame
        let input: VecDeque<u8> = b"  \x1b[C".iter().copied().collect();

        let mut player = Player::new(settings(5), finished_source(dir.path()), input, Vec::new(), Arc::new(AtomicBool::new(false)))
            .with_audio(Box::new(audio.clone()));
        let report = player.run().unwrap();

        assert_eq!(report.end, EndReason::EndOfStream);
        assert_eq!(report.frames_painted, 1);
        assert_eq!(
            *audio.calls.lock().unwrap(),
            vec!["start", "pause", "resume", "seek 5", "stop"]
        );
    }

    #[test]
    fn test_forward_jump_counts_skipped_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 12);
        let shown = Arc::new(Mutex::new(Vec::new()));
        let source = Recording {
            inner: DirFrameSource::new(dir.path(), "bmp")
                .with_policy(RetirePolicy::Delete)
                .with_producer(Arc::new(AtomicBool::new(true))),
            shown: shown.clone(),
        };
        // Right arrow is replayed as soon as frame 1 is up: 5s at 2fps = frame 10
        let input: VecDeque<u8> = b"\x1b[C".iter().copied().collect();

        let mut player = Player::new(settings(2), source, input, Vec::new(), Arc::new(AtomicBool::new(false)));
        let report = player.run().unwrap();

        let shown = indices(&shown);
        assert_eq!(shown[0], 1);
        assert_eq!(shown[1], 10);
        assert_eq!(report.end, EndReason::EndOfStream);
        assert!(report.frames_skipped >= 8);
    }

    #[test]
    fn test_frames_are_fitted_to_window() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 100, 50]))
            .save(dir.path().join("frame1.bmp"))
            .unwrap();
        let mut config = settings(5);
        config.window = (4, 4);
        config.info_bar = true;
        config.duration = Some(60.0);

        let mut player = Player::new(config, finished_source(dir.path()), VecDeque::<u8>::new(), Vec::new(), Arc::new(AtomicBool::new(false)));
        player.run().unwrap();

        let out = String::from_utf8(player.into_writer()).unwrap();
        // 4x4 picture: 2 character rows, 3 drawable columns each
        assert_eq!(out.matches('▄').count(), 6);
        assert!(!out.contains("\x1b[3;4H"));
        // Info bar on row 3
        assert!(out.contains("\x1b[3;1H"));
        assert!(out.contains("00:00 / 01:00"));
    }
}
