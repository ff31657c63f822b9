use anyhow::{bail, Context, Result};
use std::path::Path;

/// One RGB sample.
///
/// Channels are wider than a byte so that `-1` can mark a pixel that has
/// never been painted. Real samples always lie in `0..=255`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Pixel {
    pub r: i16,
    pub g: i16,
    pub b: i16,
}

impl Pixel {
    /// "Never rendered". Differs from every real colour, so diffing a frame
    /// against a buffer full of these repaints every cell.
    pub const SENTINEL: Pixel = Pixel { r: -1, g: -1, b: -1 };

    pub const BLACK: Pixel = Pixel { r: 0, g: 0, b: 0 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as i16,
            g: g as i16,
            b: b as i16,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.r < 0 || self.g < 0 || self.b < 0
    }
}

impl Default for Pixel {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Row-major pixel grid. Width and height are always non-zero.
#[derive(Clone, PartialEq, Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl FrameBuffer {
    /// Black buffer. Panics on a zero dimension.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Pixel::BLACK)
    }

    /// Sentinel-filled buffer used as the "previous frame" of a fresh screen.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::filled(width, height, Pixel::SENTINEL)
    }

    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        assert!(width > 0 && height > 0, "frame buffer must not be empty ({}x{})", width, height);
        Self {
            width,
            height,
            pixels: vec![pixel; width as usize * height as usize],
        }
    }

    /// Builds a buffer from packed `rgb24` bytes (the layout ffmpeg emits for `-pix_fmt rgb24`).
    pub fn from_rgb(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("invalid frame dimensions {}x{}", width, height);
        }
        let expected = width as usize * height as usize * 3;
        if data.len() < expected {
            bail!("frame data too short: {} bytes for {}x{} (need {})", data.len(), width, height, expected);
        }

        let pixels = data[..expected]
            .chunks_exact(3)
            .map(|c| Pixel::rgb(c[0], c[1], c[2]))
            .collect();

        Ok(Self { width, height, pixels })
    }

    pub fn from_image(image: &image::RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgb(width, height, image.as_raw())
    }

    /// Decodes any format the `image` crate understands.
    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("could not open {} (it may be corrupt)", path.display()))?
            .to_rgb8();
        Self::from_image(&image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline(always)]
    pub fn get(&self, row: u32, col: u32) -> Pixel {
        self.pixels[row as usize * self.width as usize + col as usize]
    }

    #[cfg(test)]
    pub fn set(&mut self, row: u32, col: u32, pixel: Pixel) {
        let idx = row as usize * self.width as usize + col as usize;
        self.pixels[idx] = pixel;
    }

    #[cfg(test)]
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }
}
