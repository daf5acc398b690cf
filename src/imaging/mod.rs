//! Pixel-plane primitives shared by the mask and background stages.

mod blur;
mod resample;

pub use blur::GaussianBlur;
pub use resample::{Rescaler, SmoothingQuality};

use image::RgbaImage;

/// Replaces `image` with a fresh buffer only when its size differs.
pub fn ensure_rgba(image: &mut RgbaImage, width: u32, height: u32) -> bool {
    if image.dimensions() == (width, height) {
        return false;
    }
    *image = RgbaImage::new(width, height);
    true
}
