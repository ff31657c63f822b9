use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::VecDeque;
use std::io::Read;
use std::thread;
use std::time::Duration;

const ETX: u8 = 3;
const ESC: u8 = 27;

/// How long to wait for the rest of an escape sequence once ESC was seen.
const SEQUENCE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Quit,
    TogglePause,
    /// Seconds, positive is forward.
    Seek(f64),
}

/// Raw keyboard bytes.
pub trait InputSource {
    /// Next byte if one is already available. Never blocks.
    fn try_read(&mut self) -> Result<Option<u8>>;
    /// Next byte, waiting at most `timeout`.
    fn read_timeout(&mut self, timeout: Duration) -> Result<Option<u8>>;
}

/// Scripted input, used for replaying key presses.
impl InputSource for VecDeque<u8> {
    fn try_read(&mut self) -> Result<Option<u8>> {
        Ok(self.pop_front())
    }

    fn read_timeout(&mut self, _timeout: Duration) -> Result<Option<u8>> {
        Ok(self.pop_front())
    }
}

/// Stdin bytes pumped by a background thread, so the render loop can poll
/// without blocking. Expects the terminal to already be in raw mode.
pub struct StdinInput {
    rx: Receiver<u8>,
}

impl StdinInput {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("tmv-stdin".to_owned())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut lock = stdin.lock();
                let mut byte = [0u8; 1];
                loop {
                    match lock.read(&mut byte) {
                        Ok(0) => break,
                        Ok(_) => {
                            if tx.send(byte[0]).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            log::warn!("stdin read failed: {}", e);
                            break;
                        }
                    }
                }
            })
            .context("failed to spawn input thread")?;
        Ok(Self { rx })
    }
}

impl InputSource for StdinInput {
    fn try_read(&mut self) -> Result<Option<u8>> {
        match self.rx.try_recv() {
            Ok(byte) => Ok(Some(byte)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn read_timeout(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

/// Turns key bytes into transport commands.
///
/// | keys            | command             |
/// |-----------------|---------------------|
/// | Ctrl-C, `q`     | `Quit`              |
/// | space           | `TogglePause`       |
/// | `ESC [ C` right | `Seek(+seek_step)`  |
/// | `ESC [ D` left  | `Seek(-seek_step)`  |
///
/// Anything else is swallowed. `ESC [` always consumes the byte after it,
/// recognised or not. A byte after a bare ESC that is not `[` is kept and
/// decoded as a key of its own, so ESC then space still pauses.
#[derive(Clone, Debug)]
pub struct TransportController {
    seek_step: f64,
    pending: Option<u8>,
}

impl TransportController {
    pub fn new(seek_step: f64) -> Self {
        Self {
            seek_step,
            pending: None,
        }
    }

    /// Reads until a command is recognised or no input is pending.
    pub fn poll(&mut self, input: &mut impl InputSource) -> Result<Option<Command>> {
        loop {
            let byte = match self.pending.take() {
                Some(byte) => byte,
                None => match input.try_read()? {
                    Some(byte) => byte,
                    None => return Ok(None),
                },
            };
            if let Some(command) = self.decode(byte, input)? {
                log::debug!("transport: {:?}", command);
                return Ok(Some(command));
            }
        }
    }

    fn decode(&mut self, byte: u8, input: &mut impl InputSource) -> Result<Option<Command>> {
        let command = match byte {
            ETX | b'q' => Some(Command::Quit),
            b' ' => Some(Command::TogglePause),
            ESC => {
                match input.read_timeout(SEQUENCE_TIMEOUT)? {
                    Some(b'[') => {}
                    Some(other) => {
                        self.pending = Some(other);
                        return Ok(None);
                    }
                    None => return Ok(None),
                }
                match input.read_timeout(SEQUENCE_TIMEOUT)? {
                    Some(b'C') => Some(Command::Seek(self.seek_step)),
                    Some(b'D') => Some(Command::Seek(-self.seek_step)),
                    _ => None,
                }
            }
            _ => None,
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::PlaybackClock;
    use std::time::Instant;

    fn drain(controller: &mut TransportController, bytes: &[u8]) -> Vec<Command> {
        let mut input: VecDeque<u8> = bytes.iter().copied().collect();
        let mut commands = Vec::new();
        while let Some(command) = controller.poll(&mut input).unwrap() {
            commands.push(command);
        }
        assert!(input.is_empty());
        assert_eq!(controller.pending, None);
        commands
    }

    #[test]
    fn test_no_input_is_noop() {
        let mut controller = TransportController::new(5.0);
        assert_eq!(controller.poll(&mut VecDeque::<u8>::new()).unwrap(), None);
    }

    #[test]
    fn test_key_map() {
        let mut controller = TransportController::new(5.0);
        assert_eq!(drain(&mut controller, &[3]), vec![Command::Quit]);
        assert_eq!(drain(&mut controller, b"q"), vec![Command::Quit]);
        assert_eq!(drain(&mut controller, b" "), vec![Command::TogglePause]);
        assert_eq!(drain(&mut controller, b"\x1b[C"), vec![Command::Seek(5.0)]);
        assert_eq!(drain(&mut controller, b"\x1b[D"), vec![Command::Seek(-5.0)]);
    }

    #[test]
    fn test_unknown_sequences_stay_aligned() {
        let mut controller = TransportController::new(5.0);
        // Up arrow, stray letter, then a real command
        assert_eq!(drain(&mut controller, b"\x1b[Ax\x1b[C "), vec![Command::Seek(5.0), Command::TogglePause]);
        // Lone ESC at the end of input
        assert_eq!(drain(&mut controller, b" \x1b"), vec![Command::TogglePause]);
    }

    #[test]
    fn test_key_after_bare_escape_is_kept() {
        let mut controller = TransportController::new(5.0);
        assert_eq!(drain(&mut controller, b"\x1b "), vec![Command::TogglePause]);
        assert_eq!(drain(&mut controller, b"\x1bq"), vec![Command::Quit]);
        // ESC ESC [ C: the second ESC still starts a sequence
        assert_eq!(drain(&mut controller, b"\x1b\x1b[C"), vec![Command::Seek(5.0)]);
    }

    #[test]
    fn test_keys_after_bare_escape_keep_order() {
        let mut controller = TransportController::new(5.0);
        let mut input: VecDeque<u8> = b"\x1b q".iter().copied().collect();
        assert_eq!(controller.poll(&mut input).unwrap(), Some(Command::TogglePause));
        assert_eq!(controller.poll(&mut input).unwrap(), Some(Command::Quit));
        assert_eq!(controller.poll(&mut input).unwrap(), None);
    }

    #[test]
    fn test_two_left_arrows_rewind_ten_seconds() {
        let mut controller = TransportController::new(5.0);
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(60);

        let reference = PlaybackClock::start_at(t0);
        let mut clock = PlaybackClock::start_at(t0);
        for command in drain(&mut controller, &[27, 91, 68, 27, 91, 68]) {
            if let Command::Seek(delta) = command {
                clock.seek_at(delta, now);
            }
        }

        let rewound = reference.display_time_at(now) - clock.display_time_at(now);
        assert!((rewound - 10.0).abs() < 1e-6, "rewound {}", rewound);
    }
}
