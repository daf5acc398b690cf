use super::MaskBuffer;
use crate::imaging::GaussianBlur;

pub const DEFAULT_SOFTEN_RADIUS: f32 = 4.0;

/// Feathers mask edges so the cutout blends into the background.
///
/// Resolution and channel count are preserved; output intensities are used
/// directly as alpha by the compositor.
#[derive(Debug)]
pub struct EdgeSoftener {
    blur: GaussianBlur,
    softened: MaskBuffer,
}

impl EdgeSoftener {
    pub fn new(radius: f32) -> Self {
        Self {
            blur: GaussianBlur::new(radius),
            softened: MaskBuffer::default(),
        }
    }

    pub fn radius(&self) -> f32 {
        self.blur.sigma()
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.blur.set_sigma(radius);
    }

    pub fn soften(&mut self, mask: &MaskBuffer) -> &MaskBuffer {
        let _span = tracing::debug_span!("soften").entered();
        let (width, height) = mask.dimensions();
        self.softened.resize_if_needed(width, height);
        self.blur.apply(
            mask.as_slice(),
            self.softened.as_mut_slice(),
            width,
            height,
            1,
        );
        &self.softened
    }

    pub fn softened(&self) -> &MaskBuffer {
        &self.softened
    }
}

impl Default for EdgeSoftener {
    fn default() -> Self {
        Self::new(DEFAULT_SOFTEN_RADIUS)
    }
}
