mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::RgbaImage;

/// Receives every frame the pipeline emits.
pub trait OutputSink {
    /// Writes one opaque RGBA frame. A failed write is not fatal to the loop.
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Resolution the sink was negotiated at, as (width, height).
    fn resolution(&self) -> (u32, u32);
}
