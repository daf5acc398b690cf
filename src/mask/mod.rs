mod buffer;
pub mod morphology;
mod soften;

pub use buffer::{probability_to_intensity, MaskBuffer, MaskSamples, RawMask};
pub use morphology::MorphologyEngine;
pub use soften::EdgeSoftener;
