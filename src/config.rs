use crate::error::{PipelineError, Result};
use crate::imaging::SmoothingQuality;
use std::time::Duration;

/// Tunables for mask refinement, background generation and compositing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw mask samples strictly above this value become foreground.
    pub threshold: u8,
    /// Minimum foreground pixels a binarized mask needs before it is refined.
    pub min_mask_pixels: usize,
    /// A softened mask whose brightest pixel does not exceed this is rejected.
    pub min_alpha: u8,
    /// Fraction of the output resolution fed to the segmentation model.
    pub model_scale: f32,
    /// Interpolation used when upscaling the refined mask.
    pub rescale_quality: SmoothingQuality,
    /// Gaussian sigma, in output pixels, for edge feathering.
    pub soften_radius: f32,
    /// Fraction of the output resolution the live-blur background is built at.
    pub background_scale: f32,
    /// Gaussian sigma, in downscaled pixels, for the live-blur background.
    pub background_blur_radius: f32,
    /// How long a tick waits for the segmentation model.
    pub inference_timeout: Duration,
    /// Consecutive mask-less ticks that may reuse the last good mask. 0 disables.
    pub mask_hold_ticks: u32,
    /// Ticks between telemetry summaries.
    pub stats_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_mask_pixels: 50,
            min_alpha: 50,
            model_scale: 0.7,
            rescale_quality: SmoothingQuality::Medium,
            soften_radius: 4.0,
            background_scale: 0.4,
            background_blur_radius: 10.0,
            inference_timeout: Duration::from_millis(200),
            mask_hold_ticks: 0,
            stats_interval: 30,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        check_scale("model_scale", self.model_scale)?;
        check_scale("background_scale", self.background_scale)?;
        if !(self.soften_radius.is_finite() && self.soften_radius >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "soften_radius must be >= 0, got {}",
                self.soften_radius
            )));
        }
        if !(self.background_blur_radius.is_finite() && self.background_blur_radius >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "background_blur_radius must be >= 0, got {}",
                self.background_blur_radius
            )));
        }
        if self.inference_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "inference_timeout must be non-zero".into(),
            ));
        }
        if self.stats_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "stats_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolution requested from the segmentation model for a given output size.
    pub fn model_resolution(&self, width: u32, height: u32) -> (u32, u32) {
        scaled_dimensions(width, height, self.model_scale)
    }

    /// Resolution the live-blur background is computed at.
    pub fn background_resolution(&self, width: u32, height: u32) -> (u32, u32) {
        scaled_dimensions(width, height, self.background_scale)
    }
}

fn check_scale(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

/// Rounds each axis and never returns an empty grid.
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = (width as f32 * scale).round().max(1.0) as u32;
    let h = (height as f32 * scale).round().max(1.0) as u32;
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_scale() {
        let config = PipelineConfig {
            model_scale: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let config = PipelineConfig {
            background_scale: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn model_resolution_rounds_like_the_default_scale() {
        let config = PipelineConfig::default();
        assert_eq!(config.model_resolution(640, 480), (448, 336));
        assert_eq!(config.background_resolution(640, 480), (256, 192));
    }

    #[test]
    fn scaled_dimensions_never_empty() {
        assert_eq!(scaled_dimensions(1, 1, 0.1), (1, 1));
    }
}
