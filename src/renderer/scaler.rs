use rayon::prelude::*;

use super::pixel::{FrameBuffer, Pixel};

/// Samples per axis taken for each output pixel. 1 = nearest neighbour.
pub const DEFAULT_SAMPLES: u32 = 5;

/// Output size asked for on the command line. `None` means "fit the window".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Requested {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Zoom factors that fit a `source` sized picture into the target.
///
/// - nothing requested: largest uniform zoom that fits the window
/// - one side requested: uniform zoom derived from that side
/// - both requested: independent X/Y zoom (aspect ratio is not preserved)
pub fn get_zoom(requested: Requested, window: (u32, u32), source: (u32, u32)) -> (f32, f32) {
    let (src_w, src_h) = (source.0.max(1) as f32, source.1.max(1) as f32);

    match (requested.width, requested.height) {
        (None, None) => {
            let zoom = (window.0 as f32 / src_w).min(window.1 as f32 / src_h);
            (zoom, zoom)
        }
        (Some(w), None) => {
            let zoom = w as f32 / src_w;
            (zoom, zoom)
        }
        (None, Some(h)) => {
            let zoom = h as f32 / src_h;
            (zoom, zoom)
        }
        (Some(w), Some(h)) => (w as f32 / src_w, h as f32 / src_h),
    }
}

/// Output size `scale` produces for the given zoom. Never zero.
pub fn scaled_dimensions(source: (u32, u32), zoom_x: f32, zoom_y: f32) -> (u32, u32) {
    let w = (source.0 as f32 * zoom_x).floor() as u32;
    let h = (source.1 as f32 * zoom_y).floor() as u32;
    (w.max(1), h.max(1))
}

/// Box-filter resample.
///
/// Each output pixel averages a `samples x samples` grid of points spread
/// evenly over the matching source rectangle. Sample coordinates are clamped
/// to the source bounds. Upscaling degenerates into averaging duplicated samples.
pub fn scale(source: &FrameBuffer, zoom_x: f32, zoom_y: f32, samples: u32) -> FrameBuffer {
    assert!(zoom_x > 0.0 && zoom_y > 0.0, "zoom must be positive ({}, {})", zoom_x, zoom_y);

    let samples = samples.max(1);
    let (out_w, out_h) = scaled_dimensions(source.dimensions(), zoom_x, zoom_y);

    let pixel_w = 1.0 / zoom_x as f64;
    let pixel_h = 1.0 / zoom_y as f64;

    let mut out = FrameBuffer::new(out_w, out_h);

    out.pixels_mut()
        .par_chunks_mut(out_w as usize)
        .enumerate()
        .for_each(|(row, line)| {
            for (col, pixel) in line.iter_mut().enumerate() {
                *pixel = sample_area(
                    source,
                    row as f64 * pixel_h,
                    col as f64 * pixel_w,
                    pixel_h,
                    pixel_w,
                    samples,
                );
                debug_assert!(!pixel.is_sentinel());
            }
        });

    out
}

#[inline(always)]
fn sample_area(
    source: &FrameBuffer,
    top: f64,
    left: f64,
    pixel_h: f64,
    pixel_w: f64,
    samples: u32,
) -> Pixel {
    let max_row = (source.height() - 1) as f64;
    let max_col = (source.width() - 1) as f64;
    let step_y = pixel_h / samples as f64;
    let step_x = pixel_w / samples as f64;

    let (mut r, mut g, mut b) = (0i64, 0i64, 0i64);
    for k in 0..samples {
        let y = (top + k as f64 * step_y).floor().clamp(0.0, max_row) as u32;
        for l in 0..samples {
            let x = (left + l as f64 * step_x).floor().clamp(0.0, max_col) as u32;
            let p = source.get(y, x);
            r += p.r as i64;
            g += p.g as i64;
            b += p.b as i64;
        }
    }

    let count = (samples * samples) as i64;
    let (r, g, b) = (r / count, g / count, b / count);

    // Out of range here is a sampling bug, not bad input.
    assert!(
        (0..=255).contains(&r) && (0..=255).contains(&g) && (0..=255).contains(&b),
        "invalid color value ({}, {}, {}) @({}, {})",
        r,
        g,
        b,
        left,
        top
    );

    Pixel {
        r: r as i16,
        g: g as i16,
        b: b as i16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        for row in 0..height {
            for col in 0..width {
                let r = (col * 255 / width.max(1)) as u8;
                let g = (row * 255 / height.max(1)) as u8;
                frame.set(row, col, Pixel::rgb(r, g, 255 - r));
            }
        }
        frame
    }

    #[test]
    fn test_output_dimensions_and_range() {
        let source = gradient(37, 23);
        for &(zx, zy) in &[(0.25f32, 0.5f32), (1.0, 1.0), (0.3, 2.0), (5.0, 5.0), (1.7, 0.9)] {
            let out = scale(&source, zx, zy, DEFAULT_SAMPLES);
            assert_eq!(out.width(), (37.0 * zx).floor() as u32);
            assert_eq!(out.height(), (23.0 * zy).floor() as u32);
            for p in out.pixels() {
                for c in [p.r, p.g, p.b] {
                    assert!((0..=255).contains(&c));
                }
            }
        }
    }

    #[test]
    fn test_identity_zoom_preserves_pixels() {
        let source = gradient(8, 6);
        let out = scale(&source, 1.0, 1.0, DEFAULT_SAMPLES);
        assert_eq!(out, source);
    }

    #[test]
    fn test_downscale_averages_block() {
        // 2x2 checker of black and white collapses to mid grey
        let mut source = FrameBuffer::new(2, 2);
        source.set(0, 0, Pixel::rgb(255, 255, 255));
        source.set(1, 1, Pixel::rgb(255, 255, 255));

        let out = scale(&source, 0.5, 0.5, 2);
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(out.get(0, 0), Pixel::rgb(127, 127, 127));
    }

    #[test]
    fn test_nearest_neighbour_with_one_sample() {
        let source = gradient(4, 4);
        let out = scale(&source, 0.5, 0.5, 1);
        assert_eq!(out.get(1, 1), source.get(2, 2));
    }

    #[test]
    fn test_upscale_duplicates() {
        let mut source = FrameBuffer::new(2, 1);
        source.set(0, 0, Pixel::rgb(10, 20, 30));
        source.set(0, 1, Pixel::rgb(200, 100, 0));

        let out = scale(&source, 2.0, 2.0, DEFAULT_SAMPLES);
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.get(0, 0), Pixel::rgb(10, 20, 30));
        assert_eq!(out.get(1, 1), Pixel::rgb(10, 20, 30));
        assert_eq!(out.get(0, 2), Pixel::rgb(200, 100, 0));
        assert_eq!(out.get(1, 3), Pixel::rgb(200, 100, 0));
    }

    #[test]
    fn test_tiny_zoom_never_empty() {
        let out = scale(&gradient(3, 3), 0.1, 0.1, DEFAULT_SAMPLES);
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn test_get_zoom_fits_window() {
        let (zx, zy) = get_zoom(Requested::default(), (80, 48), (160, 48));
        assert_eq!((zx, zy), (0.5, 0.5));

        let (zx, zy) = get_zoom(Requested::default(), (80, 48), (40, 96));
        assert_eq!((zx, zy), (0.5, 0.5));
    }

    #[test]
    fn test_get_zoom_single_side_keeps_aspect() {
        let req = Requested { width: Some(50), height: None };
        assert_eq!(get_zoom(req, (80, 48), (100, 10)), (0.5, 0.5));

        let req = Requested { width: None, height: Some(20) };
        assert_eq!(get_zoom(req, (80, 48), (100, 10)), (2.0, 2.0));
    }

    #[test]
    fn test_get_zoom_both_sides_independent() {
        let req = Requested { width: Some(50), height: Some(20) };
        assert_eq!(get_zoom(req, (80, 48), (100, 10)), (0.5, 2.0));
    }
}
