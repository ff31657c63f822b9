use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// Wall-clock relative time base.
///
/// `display_time = (now - start) - seek_offset - paused_total`, where the
/// paused total includes a pause still in progress. Nothing ticks on its own:
/// the render loop asks for the time on every iteration.
#[derive(Debug)]
pub struct PlaybackClock {
    start: Instant,
    seek_offset: f64,
    paused_total: Duration,
    pause_start: Option<Instant>,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(now: Instant) -> Self {
        Self {
            start: now,
            seek_offset: 0.0,
            paused_total: Duration::ZERO,
            pause_start: None,
        }
    }

    pub fn toggle_pause(&mut self) -> PlaybackState {
        self.toggle_pause_at(Instant::now())
    }

    pub fn toggle_pause_at(&mut self, now: Instant) -> PlaybackState {
        match self.pause_start.take() {
            Some(since) => {
                self.paused_total += now.saturating_duration_since(since);
                PlaybackState::Playing
            }
            None => {
                self.pause_start = Some(now);
                PlaybackState::Paused
            }
        }
    }

    /// Positive `delta` jumps forward, negative jumps back. A jump before
    /// the beginning lands on zero.
    pub fn seek(&mut self, delta: f64) {
        self.seek_at(delta, Instant::now())
    }

    pub fn seek_at(&mut self, delta: f64, now: Instant) {
        self.seek_offset -= delta;

        // Fold any overshoot back into the offset so time restarts from zero
        // instead of owing the difference.
        let raw = self.raw_time_at(now);
        if raw < 0.0 {
            self.seek_offset += raw;
        }
    }

    /// Playback position in seconds. Never negative.
    pub fn display_time(&self) -> f64 {
        self.display_time_at(Instant::now())
    }

    pub fn display_time_at(&self, now: Instant) -> f64 {
        self.raw_time_at(now).max(0.0)
    }

    /// Frame due at the current time. Frame files are numbered from 1.
    pub fn frame_index(&self, fps: u32) -> u64 {
        self.frame_index_at(fps, Instant::now())
    }

    pub fn frame_index_at(&self, fps: u32, now: Instant) -> u64 {
        frame_index_for(fps, self.display_time_at(now))
    }

    fn raw_time_at(&self, now: Instant) -> f64 {
        let mut paused = self.paused_total;
        if let Some(since) = self.pause_start {
            paused += now.saturating_duration_since(since);
        }
        let elapsed = now.saturating_duration_since(self.start);
        elapsed.as_secs_f64() - paused.as_secs_f64() - self.seek_offset
    }
}

pub fn frame_index_for(fps: u32, time: f64) -> u64 {
    ((fps as f64 * time).floor() as u64).max(1)
}
