//! Separable resampling between arbitrary resolutions.
//!
//! Each axis is reduced to a table of source taps and weights, so nearest,
//! bilinear, bicubic and area filters all share one two-pass kernel. Tables
//! and the intermediate plane are kept on the `Rescaler` and only rebuilt when
//! the geometry changes.

use crate::mask::MaskBuffer;
use image::RgbaImage;
use rayon::prelude::*;

use super::ensure_rgba;

/// Smoothing applied when resampling, mirroring a canvas' smoothing quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SmoothingQuality {
    /// Nearest neighbour.
    Off,
    /// Bilinear in both directions.
    Low,
    /// Area average when shrinking, bilinear when growing.
    #[default]
    Medium,
    /// Area average when shrinking, Catmull-Rom bicubic when growing.
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisFilter {
    Nearest,
    Bilinear,
    Bicubic,
    Area,
}

impl SmoothingQuality {
    fn axis_filter(self, src: u32, dst: u32) -> AxisFilter {
        let shrinking = dst < src;
        match self {
            Self::Off => AxisFilter::Nearest,
            Self::Low => AxisFilter::Bilinear,
            Self::Medium if shrinking => AxisFilter::Area,
            Self::Medium => AxisFilter::Bilinear,
            Self::High if shrinking => AxisFilter::Area,
            Self::High => AxisFilter::Bicubic,
        }
    }
}

/// Source taps for every output coordinate along one axis.
#[derive(Debug, Default)]
struct AxisTaps {
    /// `offsets[i]..offsets[i + 1]` indexes `indices`/`weights` for output `i`.
    offsets: Vec<usize>,
    indices: Vec<usize>,
    weights: Vec<f32>,
}

impl AxisTaps {
    fn rebuild(&mut self, filter: AxisFilter, src: u32, dst: u32) {
        self.offsets.clear();
        self.indices.clear();
        self.weights.clear();
        self.offsets.push(0);

        let scale = src as f32 / dst as f32;
        let last = src as i64 - 1;
        let clamp = |i: i64| i.clamp(0, last) as usize;

        for out in 0..dst {
            match filter {
                AxisFilter::Nearest => {
                    let i = ((out as f32 + 0.5) * scale).floor() as i64;
                    self.push(clamp(i), 1.0);
                }
                AxisFilter::Bilinear => {
                    let center = (out as f32 + 0.5) * scale - 0.5;
                    let i = center.floor();
                    let t = center - i;
                    let i = i as i64;
                    self.push(clamp(i), 1.0 - t);
                    self.push(clamp(i + 1), t);
                }
                AxisFilter::Bicubic => {
                    let center = (out as f32 + 0.5) * scale - 0.5;
                    let i = center.floor();
                    let t = center - i;
                    let i = i as i64;
                    for (k, w) in catmull_rom_weights(t).into_iter().enumerate() {
                        self.push(clamp(i - 1 + k as i64), w);
                    }
                }
                AxisFilter::Area => {
                    let start = out as f32 * scale;
                    let end = (start + scale).min(src as f32);
                    let mut i = start.floor() as i64;
                    while (i as f32) < end {
                        let overlap = end.min(i as f32 + 1.0) - start.max(i as f32);
                        if overlap > 0.0 {
                            self.push(clamp(i), overlap / scale);
                        }
                        i += 1;
                    }
                }
            }
            self.offsets.push(self.indices.len());
        }
    }

    #[inline]
    fn push(&mut self, index: usize, weight: f32) {
        self.indices.push(index);
        self.weights.push(weight);
    }

    #[inline]
    fn taps(&self, out: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let range = self.offsets[out]..self.offsets[out + 1];
        self.indices[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }
}

fn catmull_rom_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    src: (u32, u32),
    dst: (u32, u32),
    quality: SmoothingQuality,
}

/// Resolution converter with cached filter tables and scratch storage.
#[derive(Debug, Default)]
pub struct Rescaler {
    quality: SmoothingQuality,
    geometry: Option<Geometry>,
    horizontal: AxisTaps,
    vertical: AxisTaps,
    scratch: Vec<f32>,
}

impl Rescaler {
    pub fn new(quality: SmoothingQuality) -> Self {
        Self {
            quality,
            ..Default::default()
        }
    }

    pub fn quality(&self) -> SmoothingQuality {
        self.quality
    }

    pub fn set_quality(&mut self, quality: SmoothingQuality) {
        self.quality = quality;
    }

    /// Resamples an interleaved `channels`-per-pixel plane.
    ///
    /// `dst` must hold exactly `dst_dims.0 * dst_dims.1 * channels` samples.
    pub fn resample(
        &mut self,
        src: &[u8],
        src_dims: (u32, u32),
        dst: &mut [u8],
        dst_dims: (u32, u32),
        channels: usize,
    ) {
        let (sw, sh) = (src_dims.0 as usize, src_dims.1 as usize);
        let (dw, dh) = (dst_dims.0 as usize, dst_dims.1 as usize);
        assert_eq!(src.len(), sw * sh * channels, "source plane size mismatch");
        assert_eq!(dst.len(), dw * dh * channels, "destination plane size mismatch");
        if dst.is_empty() {
            return;
        }
        assert!(!src.is_empty(), "cannot resample an empty source");

        if src_dims == dst_dims {
            dst.copy_from_slice(src);
            return;
        }

        self.prepare(src_dims, dst_dims);

        let src_row = sw * channels;
        let mid_row = dw * channels;
        self.scratch.resize(mid_row * sh, 0.0);

        let horizontal = &self.horizontal;
        self.scratch
            .par_chunks_mut(mid_row)
            .zip(src.par_chunks(src_row))
            .for_each(|(out, row)| {
                for x in 0..dw {
                    for c in 0..channels {
                        let mut sum = 0.0f32;
                        for (i, w) in horizontal.taps(x) {
                            sum += row[i * channels + c] as f32 * w;
                        }
                        out[x * channels + c] = sum;
                    }
                }
            });

        let vertical = &self.vertical;
        let scratch = &self.scratch;
        dst.par_chunks_mut(mid_row)
            .enumerate()
            .for_each(|(y, out)| {
                for (i, value) in out.iter_mut().enumerate() {
                    let mut sum = 0.0f32;
                    for (row, w) in vertical.taps(y) {
                        sum += scratch[row * mid_row + i] * w;
                    }
                    *value = sum.round().clamp(0.0, 255.0) as u8;
                }
            });
    }

    /// Rescales a mask into `dst`, resizing `dst` to `width`x`height` if needed.
    pub fn rescale_mask(&mut self, src: &MaskBuffer, dst: &mut MaskBuffer, width: u32, height: u32) {
        let _span = tracing::debug_span!("rescale", from = ?src.dimensions(), to = ?(width, height))
            .entered();
        dst.resize_if_needed(width, height);
        self.resample(
            src.as_slice(),
            src.dimensions(),
            dst.as_mut_slice(),
            (width, height),
            1,
        );
    }

    /// Rescales an RGBA image into `dst`, replacing `dst` only if its size differs.
    pub fn rescale_rgba(&mut self, src: &RgbaImage, dst: &mut RgbaImage, width: u32, height: u32) {
        ensure_rgba(dst, width, height);
        let out: &mut [u8] = dst;
        self.resample(src.as_raw(), src.dimensions(), out, (width, height), 4);
    }

    fn prepare(&mut self, src: (u32, u32), dst: (u32, u32)) {
        let geometry = Geometry {
            src,
            dst,
            quality: self.quality,
        };
        if self.geometry == Some(geometry) {
            return;
        }
        self.horizontal
            .rebuild(self.quality.axis_filter(src.0, dst.0), src.0, dst.0);
        self.vertical
            .rebuild(self.quality.axis_filter(src.1, dst.1), src.1, dst.1);
        self.geometry = Some(geometry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUALITIES: [SmoothingQuality; 4] = [
        SmoothingQuality::Off,
        SmoothingQuality::Low,
        SmoothingQuality::Medium,
        SmoothingQuality::High,
    ];

    #[test]
    fn output_dimensions_match_request() {
        let src = MaskBuffer::from_vec(7, 5, (0..35).map(|v| (v * 7) as u8).collect());
        let targets = [(1, 1), (3, 9), (7, 5), (14, 10), (640, 480), (13, 2)];
        for quality in QUALITIES {
            let mut rescaler = Rescaler::new(quality);
            let mut dst = MaskBuffer::default();
            for (w, h) in targets {
                rescaler.rescale_mask(&src, &mut dst, w, h);
                assert_eq!(dst.dimensions(), (w, h), "{quality:?}");
                assert_eq!(dst.as_slice().len(), (w * h) as usize);
            }
        }
    }

    #[test]
    fn constant_plane_stays_constant() {
        let src = MaskBuffer::from_vec(10, 6, vec![200; 60]);
        for quality in QUALITIES {
            let mut rescaler = Rescaler::new(quality);
            let mut up = MaskBuffer::default();
            let mut down = MaskBuffer::default();
            rescaler.rescale_mask(&src, &mut up, 33, 17);
            rescaler.rescale_mask(&src, &mut down, 3, 4);
            assert!(up.as_slice().iter().all(|&v| v == 200), "{quality:?}");
            assert!(down.as_slice().iter().all(|&v| v == 200), "{quality:?}");
        }
    }

    #[test]
    fn area_downscale_averages_blocks() {
        // 4x2 -> 2x1: each output pixel averages a 2x2 block.
        let src = MaskBuffer::from_vec(4, 2, vec![0, 255, 255, 255, 0, 255, 255, 255]);
        let mut rescaler = Rescaler::new(SmoothingQuality::Medium);
        let mut dst = MaskBuffer::default();
        rescaler.rescale_mask(&src, &mut dst, 2, 1);
        assert_eq!(dst.as_slice(), &[128, 255]);
    }

    #[test]
    fn bilinear_upscale_interpolates_between_samples() {
        let src = MaskBuffer::from_vec(2, 1, vec![0, 255]);
        let mut rescaler = Rescaler::new(SmoothingQuality::Low);
        let mut dst = MaskBuffer::default();
        rescaler.rescale_mask(&src, &mut dst, 4, 1);
        let out = dst.as_slice();
        assert_eq!(out[0], 0);
        assert_eq!(out[3], 255);
        assert!(out[1] > 0 && out[1] < out[2] && out[2] < 255);
    }

    #[test]
    fn nearest_keeps_binary_values() {
        let src = MaskBuffer::from_vec(3, 3, vec![0, 255, 0, 255, 255, 255, 0, 255, 0]);
        let mut rescaler = Rescaler::new(SmoothingQuality::Off);
        let mut dst = MaskBuffer::default();
        rescaler.rescale_mask(&src, &mut dst, 10, 7);
        assert!(dst.as_slice().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn rgba_channels_do_not_bleed() {
        let src = RgbaImage::from_pixel(5, 4, image::Rgba([10, 20, 30, 255]));
        let mut dst = RgbaImage::new(1, 1);
        let mut rescaler = Rescaler::new(SmoothingQuality::High);
        rescaler.rescale_rgba(&src, &mut dst, 12, 9);
        assert_eq!(dst.dimensions(), (12, 9));
        assert!(dst.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn same_size_is_a_copy() {
        let data: Vec<u8> = (0..12).collect();
        let src = MaskBuffer::from_vec(4, 3, data.clone());
        let mut dst = MaskBuffer::default();
        Rescaler::default().rescale_mask(&src, &mut dst, 4, 3);
        assert_eq!(dst.as_slice(), data.as_slice());
    }
}
