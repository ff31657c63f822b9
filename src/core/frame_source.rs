use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use std::cmp::Ordering as CmpOrdering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::decoder::FrameData;
use crate::renderer::FrameBuffer;

/// Outcome of asking a source for a frame.
#[derive(Debug)]
pub enum FrameStatus {
    Ready(FrameBuffer),
    /// Not available yet but still expected. Retry later.
    Pending,
    /// The producer is done and the frame will never arrive.
    EndOfStream,
}

/// Resolves frame indices (1-based) to decoded bitmaps.
///
/// Requests need not be sequential: the player asks for whatever index the
/// clock demands, so seeks simply show up as jumps.
pub trait FrameSource {
    fn next_frame(&mut self, index: u64) -> Result<FrameStatus>;
}

/// Exit signal of whatever is producing frames.
pub trait ProducerState {
    fn finished(&mut self) -> bool;
}

impl ProducerState for Arc<AtomicBool> {
    fn finished(&mut self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// What happens to a frame file once it has been consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetirePolicy {
    /// Delete it, together with any earlier file that was skipped over.
    #[default]
    Delete,
    /// Leave it until cleanup so backward seeks can show it again.
    Keep,
}

/// Polls a directory the decoder fills with `frame<N>.<ext>` files.
///
/// File presence is the only synchronisation with the decoder. A file that
/// exists but does not decode is assumed to be half written and reported as
/// `Pending`.
pub struct DirFrameSource {
    dir: PathBuf,
    extension: String,
    policy: RetirePolicy,
    producer: Option<Box<dyn ProducerState>>,
    retired_through: u64,
    highest_seen: u64,
    waiting_on: Option<u64>,
}

impl DirFrameSource {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            policy: RetirePolicy::default(),
            producer: None,
            retired_through: 0,
            highest_seen: 0,
            waiting_on: None,
        }
    }

    pub fn with_policy(mut self, policy: RetirePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Without a producer, end of stream is inferred: the file after the
    /// last one seen is missing.
    pub fn with_producer(mut self, producer: impl ProducerState + 'static) -> Self {
        self.producer = Some(Box::new(producer));
        self
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame{}.{}", index, self.extension))
    }

    fn retire_through(&mut self, index: u64) {
        let mut removed = 0;
        for i in (self.retired_through + 1)..=index {
            match std::fs::remove_file(self.frame_path(i)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("could not remove frame {}: {}", i, e),
            }
        }
        if removed > 1 {
            log::debug!("retired {} frames through {}", removed, index);
        }
        self.retired_through = index;
    }

    fn stream_ended(&mut self, path: &Path) -> bool {
        match self.producer.as_mut() {
            // Decoder may have written the file right before exiting
            Some(producer) => producer.finished() && !path.exists(),
            None => self.highest_seen > 0 && !self.frame_path(self.highest_seen + 1).exists(),
        }
    }
}

impl FrameSource for DirFrameSource {
    fn next_frame(&mut self, index: u64) -> Result<FrameStatus> {
        if self.policy == RetirePolicy::Delete && index <= self.retired_through {
            // Already consumed and deleted; hold until the clock moves past it
            return Ok(FrameStatus::Pending);
        }

        let path = self.frame_path(index);
        if path.exists() {
            return match FrameBuffer::load(&path) {
                Ok(frame) => {
                    self.highest_seen = self.highest_seen.max(index);
                    self.waiting_on = None;
                    if self.policy == RetirePolicy::Delete {
                        self.retire_through(index);
                    }
                    Ok(FrameStatus::Ready(frame))
                }
                Err(e) => {
                    log::debug!("frame {} not readable yet: {:#}", index, e);
                    Ok(FrameStatus::Pending)
                }
            };
        }

        if index > self.highest_seen && self.stream_ended(&path) {
            log::info!("end of stream at frame {}", index);
            return Ok(FrameStatus::EndOfStream);
        }

        if self.waiting_on != Some(index) {
            log::debug!("waiting for decoder: frame {}", index);
            self.waiting_on = Some(index);
        }
        Ok(FrameStatus::Pending)
    }
}

/// Frames handed over in memory by a decoder thread.
///
/// Frames arrive in order. Anything older than the requested index is
/// dropped; a newer one is held back until the clock reaches it. A
/// disconnected channel means the decoder is done.
pub struct ChannelFrameSource {
    rx: Receiver<FrameData>,
    held: Option<FrameData>,
}

impl ChannelFrameSource {
    pub fn new(rx: Receiver<FrameData>) -> Self {
        Self { rx, held: None }
    }
}

impl FrameSource for ChannelFrameSource {
    fn next_frame(&mut self, index: u64) -> Result<FrameStatus> {
        if let Some(data) = self.held.take() {
            match data.index.cmp(&index) {
                CmpOrdering::Equal => return Ok(FrameStatus::Ready(data.frame)),
                CmpOrdering::Greater => {
                    self.held = Some(data);
                    return Ok(FrameStatus::Pending);
                }
                CmpOrdering::Less => {}
            }
        }

        loop {
            match self.rx.try_recv() {
                Ok(data) => match data.index.cmp(&index) {
                    CmpOrdering::Less => continue,
                    CmpOrdering::Equal => return Ok(FrameStatus::Ready(data.frame)),
                    CmpOrdering::Greater => {
                        self.held = Some(data);
                        return Ok(FrameStatus::Pending);
                    }
                },
                Err(TryRecvError::Empty) => return Ok(FrameStatus::Pending),
                Err(TryRecvError::Disconnected) => {
                    log::info!("decoder channel closed at frame {}", index);
                    return Ok(FrameStatus::EndOfStream);
                }
            }
        }
    }
}
