mod still;
mod v4l_capture;

pub use still::StillFrame;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbaImage;

/// Where the pipeline's video frames come from.
pub trait CaptureSource {
    /// Blocks until the next RGBA frame is available.
    fn capture_frame(&mut self) -> Result<RgbaImage>;

    /// Frame size the source was opened with, as (width, height).
    fn resolution(&self) -> (u32, u32);
}
