use anyhow::{Context, Result};
use crossterm::{cursor, terminal, QueueableCommand};
use std::io::{Stdout, Write};

const WRAP_OFF: &[u8] = b"\x1b[?7l";
const WRAP_ON: &[u8] = b"\x1b[?7h";
const RESET: &[u8] = b"\x1b[0m";

/// Terminal state held for the length of a playback.
///
/// Entering switches to raw mode, hides the cursor and disables line wrap.
/// `restore` undoes all of it and parks the cursor on the last row; it runs
/// at most once, and `Drop` calls it, so every exit path (`?`, panic, quit
/// key, signal) leaves a usable terminal behind.
pub struct TerminalSession<W: Write = Stdout> {
    out: W,
    raw_mode: bool,
    bottom_row: u16,
    active: bool,
}

impl TerminalSession<Stdout> {
    pub fn enter() -> Result<Self> {
        let (_, rows) = terminal::size().context("failed to read terminal size")?;
        terminal::enable_raw_mode().context("failed to enable raw mode")?;
        Self::with_writer(std::io::stdout(), true, rows.saturating_sub(1))
    }
}

impl<W: Write> TerminalSession<W> {
    /// `raw_mode` false leaves the tty mode untouched, for non-terminal writers.
    pub fn with_writer(mut out: W, raw_mode: bool, bottom_row: u16) -> Result<Self> {
        out.queue(cursor::Hide)?;
        out.write_all(WRAP_OFF)?;
        out.flush()?;
        log::debug!("terminal session entered (raw mode: {})", raw_mode);
        Ok(Self {
            out,
            raw_mode,
            bottom_row,
            active: true,
        })
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.active
    }

    pub fn restore(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        self.out.write_all(RESET)?;
        self.out.write_all(WRAP_ON)?;
        self.out.queue(cursor::Show)?;
        self.out.queue(cursor::MoveTo(0, self.bottom_row))?;
        // Raw mode: no implicit carriage return
        self.out.write_all(b"\r\n")?;
        self.out.flush()?;

        if self.raw_mode {
            terminal::disable_raw_mode().context("failed to leave raw mode")?;
        }
        log::debug!("terminal restored");
        Ok(())
    }

    #[cfg(test)]
    fn writer(&self) -> &W {
        &self.out
    }
}

impl<W: Write> Drop for TerminalSession<W> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            log::warn!("terminal restore failed: {:#}", e);
        }
    }
}
