use rayon::prelude::*;

/// Separable Gaussian blur with a cached kernel and reusable scratch.
///
/// `sigma` follows CSS `blur()` semantics: it is the standard deviation in
/// pixels, and the kernel extends to `ceil(3 * sigma)` on each side. Samples
/// past the edge repeat the nearest edge sample.
#[derive(Debug, Default)]
pub struct GaussianBlur {
    sigma: f32,
    kernel: Vec<f32>,
    scratch: Vec<f32>,
}

impl GaussianBlur {
    pub fn new(sigma: f32) -> Self {
        let mut blur = Self::default();
        blur.set_sigma(sigma);
        blur
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn radius(&self) -> usize {
        self.kernel.len() / 2
    }

    pub fn set_sigma(&mut self, sigma: f32) {
        let sigma = if sigma.is_finite() { sigma.max(0.0) } else { 0.0 };
        self.sigma = sigma;
        self.kernel.clear();
        if sigma < 0.01 {
            self.kernel.push(1.0);
            return;
        }

        let radius = (3.0 * sigma).ceil() as i32;
        let denom = 2.0 * sigma * sigma;
        self.kernel
            .extend((-radius..=radius).map(|i| (-(i * i) as f32 / denom).exp()));
        let total: f32 = self.kernel.iter().sum();
        for w in &mut self.kernel {
            *w /= total;
        }
    }

    /// Blurs an interleaved plane from `src` into `dst` (same size).
    pub fn apply(&mut self, src: &[u8], dst: &mut [u8], width: u32, height: u32, channels: usize) {
        let w = width as usize;
        let h = height as usize;
        assert_eq!(src.len(), w * h * channels, "blur source size mismatch");
        assert_eq!(dst.len(), src.len(), "blur destination size mismatch");
        if src.is_empty() {
            return;
        }
        if self.kernel.len() == 1 {
            dst.copy_from_slice(src);
            return;
        }

        let radius = self.radius() as isize;
        let row_len = w * channels;
        self.scratch.resize(src.len(), 0.0);

        let kernel = &self.kernel;
        let last_x = w as isize - 1;
        self.scratch
            .par_chunks_mut(row_len)
            .zip(src.par_chunks(row_len))
            .for_each(|(out, row)| {
                for x in 0..w as isize {
                    for c in 0..channels {
                        let mut sum = 0.0f32;
                        for (k, weight) in kernel.iter().enumerate() {
                            let sx = (x + k as isize - radius).clamp(0, last_x) as usize;
                            sum += row[sx * channels + c] as f32 * weight;
                        }
                        out[x as usize * channels + c] = sum;
                    }
                }
            });

        let scratch = &self.scratch;
        let last_y = h as isize - 1;
        dst.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, out)| {
                for (i, value) in out.iter_mut().enumerate() {
                    let mut sum = 0.0f32;
                    for (k, weight) in kernel.iter().enumerate() {
                        let sy = (y as isize + k as isize - radius).clamp(0, last_y) as usize;
                        sum += scratch[sy * row_len + i] * weight;
                    }
                    *value = sum.round().clamp(0.0, 255.0) as u8;
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized() {
        let blur = GaussianBlur::new(4.0);
        assert_eq!(blur.radius(), 12);
        let total: f32 = blur.kernel.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_sigma_copies() {
        let src: Vec<u8> = (0..16).map(|v| v * 10).collect();
        let mut dst = vec![0; 16];
        GaussianBlur::new(0.0).apply(&src, &mut dst, 4, 4, 1);
        assert_eq!(src, dst);
    }

    #[test]
    fn uniform_plane_is_unchanged() {
        let src = vec![90u8; 20 * 10 * 4];
        let mut dst = vec![0; src.len()];
        GaussianBlur::new(3.0).apply(&src, &mut dst, 20, 10, 4);
        assert!(dst.iter().all(|&v| v == 90));
    }

    #[test]
    fn hard_edge_becomes_gradual() {
        let width = 40u32;
        let src: Vec<u8> = (0..width).map(|x| if x < 20 { 0 } else { 255 }).collect();
        let mut dst = vec![0; src.len()];
        GaussianBlur::new(4.0).apply(&src, &mut dst, width, 1, 1);

        assert_eq!(dst[0], 0);
        assert_eq!(dst[39], 255);
        assert!(dst[19] > 0 && dst[19] < 128);
        assert!(dst[20] > 128 && dst[20] < 255);
        assert!(dst.windows(2).all(|p| p[0] <= p[1]));
    }
}
