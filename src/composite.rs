//! Alpha compositing of the live frame over the background plane.
//!
//! `out = video * a + background * (1 - a)` with `a = mask / 255`, computed in
//! integer arithmetic so fully opaque and fully transparent mask values
//! reproduce their source exactly. Output alpha is always 255.

use crate::error::assert_same_dimensions;
use crate::imaging::{ensure_rgba, Rescaler, SmoothingQuality};
use crate::mask::MaskBuffer;
use image::RgbaImage;
use rayon::prelude::*;

#[derive(Debug, Default)]
pub struct FrameCompositor {
    overlay: Option<Overlay>,
}

/// Pre-rendered surface drawn over the composite, e.g. a name banner.
#[derive(Debug)]
struct Overlay {
    source: RgbaImage,
    scaled: RgbaImage,
    rescaler: Rescaler,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears the overlay. It is stretched to the output size.
    pub fn set_overlay(&mut self, overlay: Option<RgbaImage>) {
        self.overlay = overlay.map(|source| Overlay {
            source,
            scaled: RgbaImage::new(0, 0),
            rescaler: Rescaler::new(SmoothingQuality::Medium),
        });
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Writes a complete composited frame into `output`.
    ///
    /// # Panics
    /// If `video`, `mask` and `background` do not share one resolution.
    pub fn composite(
        &mut self,
        video: &RgbaImage,
        mask: &MaskBuffer,
        background: &RgbaImage,
        output: &mut RgbaImage,
    ) {
        let _span = tracing::debug_span!("composite").entered();
        let (width, height) = video.dimensions();
        assert_same_dimensions((width, height), mask.dimensions());
        assert_same_dimensions((width, height), background.dimensions());
        ensure_rgba(output, width, height);

        let row_len = width as usize * 4;
        if row_len == 0 {
            return;
        }
        let out: &mut [u8] = output;
        out.par_chunks_mut(row_len)
            .zip(video.as_raw().par_chunks(row_len))
            .zip(background.as_raw().par_chunks(row_len))
            .zip(mask.as_slice().par_chunks(width as usize))
            .for_each(|(((out, fg), bg), alpha)| blend_row(out, fg, bg, alpha));

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.draw(output);
        }
    }
}

#[inline]
fn blend_row(out: &mut [u8], fg: &[u8], bg: &[u8], alpha: &[u8]) {
    for (i, &a) in alpha.iter().enumerate() {
        let a = a as u32;
        let ia = 255 - a;
        let px = i * 4;
        for c in 0..3 {
            let v = fg[px + c] as u32 * a + bg[px + c] as u32 * ia;
            out[px + c] = ((v + 127) / 255) as u8;
        }
        out[px + 3] = 255;
    }
}

impl Overlay {
    fn draw(&mut self, output: &mut RgbaImage) {
        let (width, height) = output.dimensions();
        if self.scaled.dimensions() != (width, height) {
            self.rescaler
                .rescale_rgba(&self.source, &mut self.scaled, width, height);
        }
        let out: &mut [u8] = output;
        out.par_chunks_mut(4)
            .zip(self.scaled.as_raw().par_chunks(4))
            .for_each(|(dst, src)| {
                let a = src[3] as u32;
                if a == 0 {
                    return;
                }
                let ia = 255 - a;
                for c in 0..3 {
                    let v = src[c] as u32 * a + dst[c] as u32 * ia;
                    dst[c] = ((v + 127) / 255) as u8;
                }
            });
    }
}

/// Renders a mask as an opaque grayscale frame for the matte debug view.
pub fn render_matte(mask: &MaskBuffer, output: &mut RgbaImage) {
    let (width, height) = mask.dimensions();
    ensure_rgba(output, width, height);
    let out: &mut [u8] = output;
    out.par_chunks_mut(4)
        .zip(mask.as_slice().par_iter())
        .for_each(|(px, &v)| px.copy_from_slice(&[v, v, v, 255]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn zero_mask_yields_background() {
        let video = solid(8, 6, [200, 100, 50, 255]);
        let mut background = solid(8, 6, [0, 0, 0, 255]);
        for (x, y, p) in background.enumerate_pixels_mut() {
            *p = Rgba([x as u8 * 20, y as u8 * 30, 7, 255]);
        }
        let mask = MaskBuffer::new(8, 6);
        let mut out = RgbaImage::new(0, 0);
        FrameCompositor::new().composite(&video, &mask, &background, &mut out);
        assert_eq!(out, background);
    }

    #[test]
    fn full_mask_yields_video() {
        let video = solid(8, 6, [200, 100, 50, 40]);
        let background = solid(8, 6, [10, 10, 10, 255]);
        let mut mask = MaskBuffer::new(8, 6);
        mask.fill(255);
        let mut out = RgbaImage::new(0, 0);
        FrameCompositor::new().composite(&video, &mask, &background, &mut out);
        assert!(out.pixels().all(|p| p.0 == [200, 100, 50, 255]));
    }

    #[test]
    fn half_alpha_blends_linearly() {
        let video = solid(1, 1, [200, 0, 100, 255]);
        let background = solid(1, 1, [0, 200, 100, 255]);
        let mut mask = MaskBuffer::new(1, 1);
        mask.fill(128);
        let mut out = RgbaImage::new(1, 1);
        FrameCompositor::new().composite(&video, &mask, &background, &mut out);
        assert_eq!(out.get_pixel(0, 0).0, [100, 100, 100, 255]);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn mismatched_mask_panics() {
        let video = solid(4, 4, [0, 0, 0, 255]);
        let background = solid(4, 4, [0, 0, 0, 255]);
        let mask = MaskBuffer::new(3, 4);
        let mut out = RgbaImage::new(0, 0);
        FrameCompositor::new().composite(&video, &mask, &background, &mut out);
    }

    #[test]
    fn overlay_draws_over_composite() {
        let video = solid(4, 2, [200, 100, 50, 255]);
        let background = solid(4, 2, [10, 10, 10, 255]);
        let mut mask = MaskBuffer::new(4, 2);
        mask.fill(255);

        let mut banner = solid(4, 2, [0, 0, 0, 0]);
        banner.put_pixel(0, 1, Rgba([255, 255, 255, 255]));
        let mut compositor = FrameCompositor::new();
        compositor.set_overlay(Some(banner));

        let mut out = RgbaImage::new(0, 0);
        compositor.composite(&video, &mask, &background, &mut out);
        assert_eq!(out.get_pixel(0, 1).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(3, 0).0, [200, 100, 50, 255]);
    }

    #[test]
    fn matte_is_grayscale() {
        let mask = MaskBuffer::from_vec(2, 1, vec![0, 180]);
        let mut out = RgbaImage::new(0, 0);
        render_matte(&mask, &mut out);
        assert_eq!(out.get_pixel(1, 0).0, [180, 180, 180, 255]);
    }
}
