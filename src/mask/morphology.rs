//! Binary mask cleanup: threshold, mirror, then a 3x3 opening.
//!
//! The outer one-pixel border is never scanned by erosion or dilation and
//! keeps the value produced by the binarize pass.

use super::buffer::{probability_to_intensity, MaskBuffer, MaskSamples, RawMask};
use crate::error::{PipelineError, Result};
use rayon::prelude::*;

pub const DEFAULT_THRESHOLD: u8 = 128;
pub const DEFAULT_MIN_PIXELS: usize = 50;

/// Refines raw model output into a clean binary mask at the model's resolution.
#[derive(Debug)]
pub struct MorphologyEngine {
    threshold: u8,
    min_pixels: usize,
    binary: MaskBuffer,
    eroded: MaskBuffer,
    refined: MaskBuffer,
}

impl MorphologyEngine {
    pub fn new(threshold: u8, min_pixels: usize) -> Self {
        Self {
            threshold,
            min_pixels,
            binary: MaskBuffer::default(),
            eroded: MaskBuffer::default(),
            refined: MaskBuffer::default(),
        }
    }

    /// Runs binarize+mirror, erosion and dilation in that order.
    ///
    /// Masks with fewer than `min_pixels` foreground pixels after binarization
    /// are rejected with `MaskTooSparse` and not processed further.
    pub fn refine(&mut self, raw: &RawMask) -> Result<&MaskBuffer> {
        let _span = tracing::debug_span!("refine").entered();

        let count = binarize_mirrored(raw, self.threshold, &mut self.binary);
        if count < self.min_pixels {
            return Err(PipelineError::MaskTooSparse {
                count,
                min: self.min_pixels,
            });
        }

        erode(&self.binary, &mut self.eroded);
        dilate(&self.eroded, &mut self.refined);

        Ok(&self.refined)
    }

    /// Result of the most recent successful `refine`.
    pub fn refined(&self) -> &MaskBuffer {
        &self.refined
    }
}

impl Default for MorphologyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_PIXELS)
    }
}

/// Writes `255` where `raw > threshold`, else `0`, flipping each row
/// horizontally to undo the front camera's mirror. Returns the foreground count.
pub fn binarize_mirrored(raw: &RawMask, threshold: u8, dst: &mut MaskBuffer) -> usize {
    let (width, height) = raw.dimensions();
    dst.resize_if_needed(width, height);
    if width == 0 || height == 0 {
        return 0;
    }

    match raw.samples() {
        MaskSamples::Intensity(data) => {
            binarize_rows(data.as_slice(), width as usize, dst.as_mut_slice(), |&v| v > threshold)
        }
        MaskSamples::Probability(data) => {
            binarize_rows(data.as_slice(), width as usize, dst.as_mut_slice(), |&v| {
                probability_to_intensity(v) > threshold
            })
        }
    }
}

fn binarize_rows<T, F>(src: &[T], width: usize, dst: &mut [u8], is_foreground: F) -> usize
where
    T: Sync,
    F: Fn(&T) -> bool + Sync,
{
    dst.par_chunks_mut(width)
        .zip(src.par_chunks(width))
        .map(|(out, row)| {
            let mut count = 0;
            for (x, sample) in row.iter().enumerate() {
                let fg = is_foreground(sample);
                out[width - 1 - x] = if fg { 255 } else { 0 };
                count += fg as usize;
            }
            count
        })
        .sum()
}

/// Reverses every row in place.
pub fn mirror_in_place(mask: &mut MaskBuffer) {
    let width = mask.width() as usize;
    if width == 0 {
        return;
    }
    mask.as_mut_slice()
        .par_chunks_mut(width)
        .for_each(|row| row.reverse());
}

/// 3x3 minimum over interior pixels; border copied from `src`.
pub fn erode(src: &MaskBuffer, dst: &mut MaskBuffer) {
    dst.copy_from(src);
    let (width, height) = src.dimensions();
    if width < 3 || height < 3 {
        return;
    }
    let w = width as usize;
    let h = height as usize;
    let input = src.as_slice();

    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .skip(1)
        .take(h - 2)
        .for_each(|(y, row)| {
            for x in 1..w - 1 {
                let mut min = 255u8;
                for ny in y - 1..=y + 1 {
                    let base = ny * w;
                    for nx in x - 1..=x + 1 {
                        min = min.min(input[base + nx]);
                    }
                }
                row[x] = min;
            }
        });
}

/// 3x3 maximum over interior pixels; border copied from `src`.
///
/// Only interior source pixels contribute, so foreground surviving on the
/// unscanned border never grows inward.
pub fn dilate(src: &MaskBuffer, dst: &mut MaskBuffer) {
    dst.copy_from(src);
    let (width, height) = src.dimensions();
    if width < 3 || height < 3 {
        return;
    }
    let w = width as usize;
    let h = height as usize;
    let input = src.as_slice();

    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .skip(1)
        .take(h - 2)
        .for_each(|(y, row)| {
            let y0 = (y - 1).max(1);
            let y1 = (y + 1).min(h - 2);
            for x in 1..w - 1 {
                let x0 = (x - 1).max(1);
                let x1 = (x + 1).min(w - 2);
                let mut max = 0u8;
                for ny in y0..=y1 {
                    let base = ny * w;
                    for nx in x0..=x1 {
                        max = max.max(input[base + nx]);
                    }
                }
                row[x] = max;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> RawMask {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        RawMask::from_intensity(width, height, data)
    }

    fn as_raw(mask: &MaskBuffer) -> RawMask {
        RawMask::from_intensity(mask.width(), mask.height(), mask.as_slice().to_vec())
    }

    #[test]
    fn output_is_binary_for_graded_input() {
        let raw = raw_from_fn(32, 24, |x, y| ((x * 13 + y * 29) % 256) as u8);
        let mut engine = MorphologyEngine::new(128, 1);
        let refined = engine.refine(&raw).unwrap();
        assert!(refined.as_slice().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn probability_masks_are_binarized_too() {
        let data = (0..20 * 20).map(|i| (i % 7) as f32 / 6.0).collect();
        let raw = RawMask::from_probability(20, 20, data);
        let mut engine = MorphologyEngine::new(128, 1);
        let refined = engine.refine(&raw).unwrap();
        assert!(refined.as_slice().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn threshold_is_strict() {
        let raw = raw_from_fn(3, 1, |x, _| [128, 129, 0][x as usize]);
        let mut dst = MaskBuffer::default();
        let count = binarize_mirrored(&raw, 128, &mut dst);
        assert_eq!(count, 1);
        // x=1 mirrors onto itself in a 3-wide row
        assert_eq!(dst.as_slice(), &[0, 255, 0]);
    }

    #[test]
    fn binarize_flips_horizontally() {
        let raw = raw_from_fn(4, 2, |x, _| if x == 0 { 255 } else { 0 });
        let mut dst = MaskBuffer::default();
        binarize_mirrored(&raw, 128, &mut dst);
        assert_eq!(dst.get(3, 0), 255);
        assert_eq!(dst.get(0, 0), 0);
        assert_eq!(dst.get(3, 1), 255);
    }

    #[test]
    fn mirroring_twice_is_identity() {
        let raw = raw_from_fn(9, 5, |x, y| if (x * y) % 3 == 0 { 255 } else { 0 });
        let mut once = MaskBuffer::default();
        let mut twice = MaskBuffer::default();
        binarize_mirrored(&raw, 128, &mut once);
        binarize_mirrored(&as_raw(&once), 128, &mut twice);
        assert_eq!(&as_raw(&twice), &raw);

        let mut in_place = once.clone();
        mirror_in_place(&mut in_place);
        mirror_in_place(&mut in_place);
        assert_eq!(in_place, once);
    }

    #[test]
    fn isolated_noise_is_removed() {
        // A solid block plus a single stray pixel.
        let raw = raw_from_fn(20, 20, |x, y| {
            let block = (5..15).contains(&x) && (5..15).contains(&y);
            let speck = x == 2 && y == 17;
            if block || speck {
                255
            } else {
                0
            }
        });
        let mut engine = MorphologyEngine::new(128, 1);
        let refined = engine.refine(&raw).unwrap();
        // Speck at x=2 is mirrored to x=17.
        assert_eq!(refined.get(17, 17), 0);
        // Block interior (mirrored x range 5..15) survives the opening.
        assert_eq!(refined.get(10, 10), 255);
        assert_eq!(refined.get(5, 5), 255);
        assert_eq!(refined.get(14, 14), 255);
        assert_eq!(refined.get(4, 10), 0);
    }

    #[test]
    fn opening_never_adds_foreground() {
        let mut binary = MaskBuffer::new(24, 18);
        for y in 0..18 {
            for x in 0..24 {
                let on = (x + y) % 5 != 0 || x == 0 || y == 17;
                binary.set(x, y, if on { 255 } else { 0 });
            }
        }
        let mut eroded = MaskBuffer::default();
        let mut opened = MaskBuffer::default();
        erode(&binary, &mut eroded);
        dilate(&eroded, &mut opened);

        for (o, b) in opened.as_slice().iter().zip(binary.as_slice()) {
            assert!(*o <= *b, "opening produced foreground absent from input");
        }
        assert!(opened.count_nonzero() <= binary.count_nonzero());
    }

    #[test]
    fn border_keeps_binarized_value() {
        let raw = raw_from_fn(6, 6, |x, y| if x == 0 || y == 0 { 255 } else { 0 });
        let mut engine = MorphologyEngine::new(128, 1);
        let refined = engine.refine(&raw).unwrap();
        // Left column mirrors to the right column.
        for y in 0..6 {
            assert_eq!(refined.get(5, y), 255);
        }
        for x in 0..6 {
            assert_eq!(refined.get(x, 0), 255);
        }
        assert_eq!(refined.get(4, 1), 0);
    }

    #[test]
    fn sparse_mask_is_rejected() {
        let raw = raw_from_fn(640, 480, |x, y| if y == 0 && x < 49 { 255 } else { 0 });
        let mut engine = MorphologyEngine::default();
        match engine.refine(&raw) {
            Err(PipelineError::MaskTooSparse { count, min }) => {
                assert_eq!(count, 49);
                assert_eq!(min, 50);
            }
            other => panic!("expected MaskTooSparse, got {other:?}"),
        }
    }

    #[test]
    fn faint_samples_do_not_count_as_foreground() {
        let raw = raw_from_fn(16, 16, |_, _| 100);
        let mut engine = MorphologyEngine::default();
        assert!(matches!(
            engine.refine(&raw),
            Err(PipelineError::MaskTooSparse { count: 0, min: 50 })
        ));
    }

    #[test]
    fn empty_mask_is_rejected() {
        let raw = raw_from_fn(16, 16, |_, _| 0);
        let mut engine = MorphologyEngine::default();
        assert!(matches!(
            engine.refine(&raw),
            Err(PipelineError::MaskTooSparse { count: 0, .. })
        ));
    }

    #[test]
    fn buffers_are_reused_between_frames() {
        let raw = raw_from_fn(16, 16, |_, _| 255);
        let mut engine = MorphologyEngine::new(128, 1);
        let first = engine.refine(&raw).unwrap().as_slice().as_ptr();
        let second = engine.refine(&raw).unwrap().as_slice().as_ptr();
        assert_eq!(first, second);
    }
}
