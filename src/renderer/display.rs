use anyhow::Result;
use std::io::Write;
use std::time::Instant;

use super::pixel::{FrameBuffer, Pixel};

/// Lower half block: background paints the top pixel, foreground the bottom one.
pub const HALF_BLOCK: char = '▄';

const SYNC_BEGIN: &[u8] = b"\x1b[?2026h";
const SYNC_END: &[u8] = b"\x1b[?2026l";

/// Paints frame buffers onto a truecolor terminal, two pixel rows per
/// character row, emitting only the cells that changed.
pub struct DiffRenderer<W: Write> {
    out: W,
    render_buffer: Vec<u8>,
    synchronized: bool,
}

impl<W: Write> DiffRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            render_buffer: Vec::with_capacity(64 * 1024),
            synchronized: false,
        }
    }

    /// Bracket every non-empty paint in DEC mode 2026 so the terminal
    /// presents the whole frame at once.
    pub fn with_synchronized_updates(mut self, enabled: bool) -> Self {
        self.synchronized = enabled;
        self
    }

    /// Writes every cell whose top or bottom pixel differs from `previous`
    /// and returns how many cells were written.
    ///
    /// The last row and column are not drawn when they would need a pixel
    /// past the edge; a trailing odd row is dropped.
    /// Colour state is left as is after the last glyph.
    pub fn paint(&mut self, current: &FrameBuffer, previous: &FrameBuffer) -> Result<usize> {
        assert_eq!(
            current.dimensions(),
            previous.dimensions(),
            "previous frame must match the current frame size"
        );

        let start_render = Instant::now();
        let (width, height) = current.dimensions();

        self.render_buffer.clear();
        let buffer = &mut self.render_buffer;

        if self.synchronized {
            buffer.extend_from_slice(SYNC_BEGIN);
        }

        let mut written = 0usize;
        for i in (0..height - 1).step_by(2) {
            for j in 0..width - 1 {
                let top = current.get(i, j);
                let bottom = current.get(i + 1, j);

                if top == previous.get(i, j) && bottom == previous.get(i + 1, j) {
                    continue;
                }

                // Cursor: ESC[row;colH
                buffer.extend_from_slice(b"\x1b[");
                write_u32_fast(buffer, i / 2 + 1);
                buffer.push(b';');
                write_u32_fast(buffer, j + 1);
                buffer.push(b'H');

                // BG: ESC[48;2;R;G;Bm   FG: ESC[38;2;R;G;Bm
                write_color(buffer, b"\x1b[48;2;", top);
                write_color(buffer, b"\x1b[38;2;", bottom);

                let mut glyph = [0u8; 4];
                buffer.extend_from_slice(HALF_BLOCK.encode_utf8(&mut glyph).as_bytes());

                written += 1;
            }
        }

        if written == 0 {
            return Ok(0);
        }

        if self.synchronized {
            buffer.extend_from_slice(SYNC_END);
        }

        self.out.write_all(buffer)?;
        self.out.flush()?;

        let render_time = start_render.elapsed();
        if render_time.as_millis() > 10 {
            log::debug!(
                "slow paint: {}us | cells: {} | frame: {}x{}",
                render_time.as_micros(),
                written,
                width,
                height
            );
        }

        Ok(written)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.out.write_all(b"\x1b[2J")?;
        self.out.flush()?;
        Ok(())
    }

    /// Single colour reset, issued once when playback ends.
    pub fn reset(&mut self) -> Result<()> {
        self.out.write_all(b"\x1b[0m")?;
        self.out.flush()?;
        Ok(())
    }

    /// Other overlays (the info bar) write through here so the terminal
    /// stream keeps a single owner.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.out
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[inline(always)]
fn write_color(buffer: &mut Vec<u8>, prefix: &[u8], pixel: Pixel) {
    debug_assert!(!pixel.is_sentinel(), "sentinel pixels are never painted");
    buffer.extend_from_slice(prefix);
    write_u8_fast(buffer, pixel.r as u8);
    buffer.push(b';');
    write_u8_fast(buffer, pixel.g as u8);
    buffer.push(b';');
    write_u8_fast(buffer, pixel.b as u8);
    buffer.push(b'm');
}

// Helper for zero-allocation integer writing
#[inline(always)]
pub(crate) fn write_u8_fast(buffer: &mut Vec<u8>, mut n: u8) {
    if n >= 100 {
        buffer.push(b'0' + n / 100);
        n %= 100;
        buffer.push(b'0' + n / 10);
        buffer.push(b'0' + n % 10);
    } else if n >= 10 {
        buffer.push(b'0' + n / 10);
        buffer.push(b'0' + n % 10);
    } else {
        buffer.push(b'0' + n);
    }
}

#[inline(always)]
pub(crate) fn write_u32_fast(buffer: &mut Vec<u8>, mut n: u32) {
    let mut digits = [0u8; 10];
    let mut len = 0;
    loop {
        digits[len] = b'0' + (n % 10) as u8;
        len += 1;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buffer.extend(digits[..len].iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, pixel: Pixel) -> FrameBuffer {
        FrameBuffer::filled(width, height, pixel)
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn glyphs(out: &[u8]) -> usize {
        count(out, "▄".as_bytes())
    }

    #[test]
    fn test_identical_frames_emit_nothing() {
        let frame = solid(6, 6, Pixel::rgb(1, 2, 3));
        let mut renderer = DiffRenderer::new(Vec::new()).with_synchronized_updates(true);

        let written = renderer.paint(&frame, &frame).unwrap();
        assert_eq!(written, 0);
        assert!(renderer.into_inner().is_empty());
    }

    #[test]
    fn test_full_paint_against_sentinel() {
        // 5x5: rows 0 and 2 are drawn (row 4 has no partner), columns 0..=3
        let frame = solid(5, 5, Pixel::rgb(9, 9, 9));
        let mut renderer = DiffRenderer::new(Vec::new());

        let written = renderer.paint(&frame, &FrameBuffer::blank(5, 5)).unwrap();
        let out = renderer.into_inner();

        assert_eq!(written, 2 * 4);
        assert_eq!(glyphs(&out), 8);
        assert_eq!(count(&out, b"\x1b[48;2;"), 8);
        assert_eq!(count(&out, b"\x1b[38;2;"), 8);
        assert_eq!(count(&out, b"\x1b[0m"), 0);
    }

    #[test]
    fn test_even_frame_trims_last_column_only() {
        let frame = solid(4, 4, Pixel::rgb(0, 0, 0));
        let mut renderer = DiffRenderer::new(Vec::new());
        let written = renderer.paint(&frame, &FrameBuffer::blank(4, 4)).unwrap();
        assert_eq!(written, 2 * 3);
    }

    #[test]
    fn test_single_changed_cell_sequence() {
        let previous = solid(4, 4, Pixel::rgb(0, 0, 0));
        let mut current = previous.clone();
        // Cell at character row 2, column 2: pixel rows 2 (top) and 3 (bottom)
        current.set(2, 1, Pixel::rgb(255, 10, 0));
        current.set(3, 1, Pixel::rgb(7, 80, 200));

        let mut renderer = DiffRenderer::new(Vec::new());
        assert_eq!(renderer.paint(&current, &previous).unwrap(), 1);

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(out, "\x1b[2;2H\x1b[48;2;255;10;0m\x1b[38;2;7;80;200m▄");
    }

    #[test]
    fn test_bottom_pixel_change_triggers_redraw() {
        let previous = solid(4, 2, Pixel::rgb(5, 5, 5));
        let mut current = previous.clone();
        current.set(1, 0, Pixel::rgb(5, 5, 6));

        let mut renderer = DiffRenderer::new(Vec::new());
        assert_eq!(renderer.paint(&current, &previous).unwrap(), 1);
    }

    #[test]
    fn test_changes_on_trimmed_edge_are_ignored() {
        let previous = solid(3, 3, Pixel::rgb(5, 5, 5));
        let mut current = previous.clone();
        current.set(2, 0, Pixel::rgb(1, 1, 1)); // odd trailing row
        current.set(0, 2, Pixel::rgb(1, 1, 1)); // last column

        let mut renderer = DiffRenderer::new(Vec::new());
        assert_eq!(renderer.paint(&current, &previous).unwrap(), 0);
    }

    #[test]
    fn test_synchronized_bracket() {
        let frame = solid(2, 2, Pixel::rgb(1, 1, 1));
        let mut renderer = DiffRenderer::new(Vec::new()).with_synchronized_updates(true);
        renderer.paint(&frame, &FrameBuffer::blank(2, 2)).unwrap();

        let out = renderer.into_inner();
        assert!(out.starts_with(SYNC_BEGIN));
        assert!(out.ends_with(SYNC_END));
    }

    #[test]
    fn test_write_numbers() {
        let mut buf = Vec::new();
        write_u8_fast(&mut buf, 0);
        buf.push(b' ');
        write_u8_fast(&mut buf, 42);
        buf.push(b' ');
        write_u8_fast(&mut buf, 255);
        buf.push(b' ');
        write_u32_fast(&mut buf, 0);
        buf.push(b' ');
        write_u32_fast(&mut buf, 1080);
        assert_eq!(buf, b"0 42 255 0 1080");
    }
}
