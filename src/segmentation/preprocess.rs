use crate::mask::RawMask;
use anyhow::Result;
use image::{imageops, RgbaImage};
use ndarray::Array4;

/// Preprocessor for converting RGBA frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

/// Flat NCHW tensor ready to hand to the runtime.
pub struct InputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGBA frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1], dropping alpha
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbaImage) -> Result<InputTensor> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in source.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(InputTensor {
            shape: tensor.shape().to_vec(),
            data: tensor.into_raw_vec(),
        })
    }

    /// Resize a model matte to `target_width`x`target_height`
    ///
    /// # Arguments
    /// * `matte` - Flattened matte at model resolution, values 0.0-1.0
    /// * `matte_width` - Width of the matte
    /// * `matte_height` - Height of the matte
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<RawMask> {
        let _span = tracing::debug_span!("postprocess").entered();

        anyhow::ensure!(
            matte.len() == matte_width as usize * matte_height as usize,
            "matte has {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        if matte_width == target_width && matte_height == target_height {
            return Ok(RawMask::from_probability(
                target_width,
                target_height,
                matte.to_vec(),
            ));
        }

        let gray = image::GrayImage::from_fn(matte_width, matte_height, |x, y| {
            let idx = (y * matte_width + x) as usize;
            image::Luma([crate::mask::probability_to_intensity(matte[idx])])
        });
        let resized = imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        Ok(RawMask::from_intensity(
            target_width,
            target_height,
            resized.into_raw(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskSamples;

    #[test]
    fn tensor_is_nchw_and_normalized() {
        let mut frame = RgbaImage::new(2, 1);
        frame.put_pixel(1, 0, image::Rgba([255, 0, 51, 255]));
        let tensor = Preprocessor::new(2, 1).preprocess(&frame).unwrap();
        assert_eq!(tensor.shape, vec![1, 3, 1, 2]);
        // planes: R(x0,x1), G(x0,x1), B(x0,x1)
        assert_eq!(tensor.data[1], 1.0);
        assert_eq!(tensor.data[3], 0.0);
        assert!((tensor.data[5] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn matte_keeps_probabilities_at_native_size() {
        let mask = Preprocessor::postprocess_matte(&[0.0, 1.0], 2, 1, 2, 1).unwrap();
        assert_eq!(mask.samples(), &MaskSamples::Probability(vec![0.0, 1.0]));
    }

    #[test]
    fn matte_is_resized_to_target() {
        let mask = Preprocessor::postprocess_matte(&[1.0; 16], 4, 4, 10, 6).unwrap();
        assert_eq!(mask.dimensions(), (10, 6));
        assert_eq!(mask.intensity(9, 5), 255);
    }

    #[test]
    fn rejects_short_matte() {
        assert!(Preprocessor::postprocess_matte(&[0.5; 3], 2, 2, 2, 2).is_err());
    }
}
