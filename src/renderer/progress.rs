use anyhow::Result;
use std::io::Write;

use super::display::write_u32_fast;

const BAR_GLYPH: &str = "▬";

/// Time label and progress line drawn on the terminal row under the picture.
pub struct InfoBar {
    row: u32,
    width: u32,
    last_drawn: Option<u64>,
}

impl InfoBar {
    /// `row` is the 1-based terminal row, `width` the number of columns to span.
    pub fn new(row: u32, width: u32) -> Self {
        Self {
            row,
            width,
            last_drawn: None,
        }
    }

    /// Redraws only when the displayed second changed. Returns whether anything was written.
    pub fn draw<W: Write>(&mut self, out: &mut W, time: f64, duration: Option<f64>) -> Result<bool> {
        let time = time.max(0.0);
        let second = time as u64;
        if self.last_drawn == Some(second) {
            return Ok(false);
        }
        self.last_drawn = Some(second);

        let mut line = Vec::with_capacity(self.width as usize * 3 + 32);
        line.extend_from_slice(b"\x1b[");
        write_u32_fast(&mut line, self.row);
        line.extend_from_slice(b";1H");
        line.extend_from_slice(b"\x1b[40m\x1b[97m");

        let label = match duration {
            Some(total) => format!("{} / {} ", format_time(time), format_time(total)),
            None => format!("{} ", format_time(time)),
        };
        line.extend_from_slice(label.as_bytes());

        if let Some(total) = duration.filter(|d| *d > 0.0) {
            let room = (self.width as usize).saturating_sub(label.chars().count());
            let filled = ((room as f64) * (time / total).clamp(0.0, 1.0)) as usize;

            line.extend_from_slice(b"\x1b[31m");
            line.extend_from_slice(BAR_GLYPH.repeat(filled).as_bytes());
            line.extend_from_slice(b"\x1b[90m");
            line.extend_from_slice(BAR_GLYPH.repeat(room - filled).as_bytes());
        }

        out.write_all(&line)?;
        out.flush()?;
        Ok(true)
    }
}

/// `MM:SS`; minutes keep growing past 99.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
