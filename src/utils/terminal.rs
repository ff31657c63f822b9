use anyhow::{Context, Result};
use serde::Serialize;

/// Terminal grid in character cells, plus the pixel area it offers the
/// half-block renderer (two pixel rows per character row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GridSize {
    pub columns: u16,
    pub rows: u16,
    pub raw_columns: u16,
    pub raw_rows: u16,
}

impl GridSize {
    /// Pixels available for a frame. The info bar takes one character row.
    pub fn pixel_area(&self, info_bar: bool) -> (u32, u32) {
        let rows = if info_bar { self.rows.saturating_sub(1) } else { self.rows };
        (self.columns.max(1) as u32, (rows.max(1) as u32) * 2)
    }
}

/// Some terminals report their size in pixels. With the character cell
/// size known (`CHAR_WIDTH`/`CHAR_HEIGHT`), an implausibly large report is
/// converted back to cells.
pub fn normalize_terminal_size(raw_cols: u16, raw_rows: u16, char_dims: Option<(u16, u16)>) -> (u16, u16) {
    if let Some((cw, ch)) = char_dims {
        if cw > 0 && ch > 0 && raw_cols >= cw.saturating_mul(32) && raw_rows >= ch.saturating_mul(16) {
            return (raw_cols / cw, raw_rows / ch);
        }
    }
    (raw_cols, raw_rows)
}

fn char_dims_from_env() -> Option<(u16, u16)> {
    let width = std::env::var("CHAR_WIDTH").ok()?.parse::<u16>().ok()?;
    let height = std::env::var("CHAR_HEIGHT").ok()?.parse::<u16>().ok()?;
    Some((width, height))
}

pub fn grid_size() -> Result<GridSize> {
    let (raw_columns, raw_rows) = crossterm::terminal::size().context("failed to read terminal size")?;
    let (columns, rows) = normalize_terminal_size(raw_columns, raw_rows, char_dims_from_env());
    Ok(GridSize {
        columns,
        rows,
        raw_columns,
        raw_rows,
    })
}
