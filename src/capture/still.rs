use super::CaptureSource;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::Path;

/// Replays one decoded picture as an endless video stream.
///
/// Useful for tuning the mask settings against a fixed shot without a camera.
pub struct StillFrame {
    frame: RgbaImage,
}

impl StillFrame {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path)
            .with_context(|| format!("Failed to decode still frame {}", path.display()))?
            .to_rgba8();
        tracing::info!(
            "Using still frame {} ({}x{})",
            path.display(),
            frame.width(),
            frame.height()
        );
        Ok(Self::new(frame))
    }
}

impl CaptureSource for StillFrame {
    fn capture_frame(&mut self) -> Result<RgbaImage> {
        Ok(self.frame.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}
