use crate::mask::RawMask;
use anyhow::Result;
use image::RgbaImage;

/// A person segmentation backend.
///
/// Runs on the segmentation worker thread, hence `Send`.
pub trait SegmentationModel: Send {
    /// Produces a person mask for `frame`, which has already been scaled to
    /// the resolution the mask must have.
    ///
    /// `Ok(None)` means the model ran but has nothing usable for this frame.
    /// A returned mask must match `frame`'s dimensions.
    fn segment(&mut self, frame: &RgbaImage) -> Result<Option<RawMask>>;

    /// Drops recurrent state. Called when the mask resolution changes.
    fn reset_state(&mut self) {}

    /// Resolution the network itself runs at, as (width, height).
    fn input_size(&self) -> (u32, u32);
}
