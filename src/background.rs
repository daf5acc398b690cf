//! Per-frame background plane generation.
//!
//! The provider owns one RGBA plane at output resolution and refreshes it at
//! the start of each composited tick. Static images are decoded once per
//! selection and only re-stretched when the output size changes; the live
//! blur is rebuilt from the current frame every tick.

use crate::config::scaled_dimensions;
use crate::error::{PipelineError, Result};
use crate::imaging::{ensure_rgba, GaussianBlur, Rescaler, SmoothingQuality};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKGROUND_SCALE: f32 = 0.4;
pub const DEFAULT_BACKGROUND_BLUR: f32 = 10.0;

/// What the user picked as background.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackgroundSelection {
    /// No explicit background: blur the live frame.
    #[default]
    None,
    Image(PathBuf),
    Color([u8; 3]),
}

/// Mode the provider is actually running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundMode {
    LiveBlur,
    StaticImage,
    SolidColor,
}

/// Identifies what the plane currently holds so static content is not redrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlaneContent {
    Live,
    Image { path: PathBuf, size: (u32, u32) },
    Color { rgb: [u8; 3], size: (u32, u32) },
}

#[derive(Debug)]
struct DecodedImage {
    path: PathBuf,
    image: RgbaImage,
}

#[derive(Debug)]
pub struct BackgroundProvider {
    selection: BackgroundSelection,
    decoded: Option<DecodedImage>,
    plane: RgbaImage,
    content: Option<PlaneContent>,
    scale: f32,
    small: RgbaImage,
    small_blurred: RgbaImage,
    downscale: Rescaler,
    upscale: Rescaler,
    stretch: Rescaler,
    blur: GaussianBlur,
}

impl BackgroundProvider {
    pub fn new(scale: f32, blur_radius: f32) -> Self {
        Self {
            selection: BackgroundSelection::None,
            decoded: None,
            plane: RgbaImage::new(0, 0),
            content: None,
            scale,
            small: RgbaImage::new(0, 0),
            small_blurred: RgbaImage::new(0, 0),
            downscale: Rescaler::new(SmoothingQuality::Medium),
            upscale: Rescaler::new(SmoothingQuality::Low),
            stretch: Rescaler::new(SmoothingQuality::Medium),
            blur: GaussianBlur::new(blur_radius),
        }
    }

    pub fn selection(&self) -> &BackgroundSelection {
        &self.selection
    }

    pub fn mode(&self) -> BackgroundMode {
        match self.selection {
            BackgroundSelection::None => BackgroundMode::LiveBlur,
            BackgroundSelection::Image(_) => BackgroundMode::StaticImage,
            BackgroundSelection::Color(_) => BackgroundMode::SolidColor,
        }
    }

    /// Switches to `selection`, decoding a new image if its identity changed.
    ///
    /// A decode failure reverts to live blur and is returned so the caller
    /// can log it; the provider stays usable either way.
    pub fn select(&mut self, selection: BackgroundSelection) -> Result<()> {
        if let BackgroundSelection::Image(path) = &selection {
            let cached = self.decoded.as_ref().is_some_and(|d| d.path == *path);
            if !cached {
                match decode(path) {
                    Ok(image) => {
                        tracing::info!(
                            path = %path.display(),
                            width = image.width(),
                            height = image.height(),
                            "Background image decoded"
                        );
                        self.decoded = Some(DecodedImage {
                            path: path.clone(),
                            image,
                        });
                    }
                    Err(err) => {
                        self.selection = BackgroundSelection::None;
                        return Err(err);
                    }
                }
            }
        }
        self.selection = selection;
        Ok(())
    }

    /// Brings the plane up to date for `frame` and returns it.
    pub fn refresh(&mut self, frame: &RgbaImage) -> &RgbaImage {
        let _span = tracing::debug_span!("background", mode = ?self.mode()).entered();
        let size = frame.dimensions();

        match self.mode() {
            BackgroundMode::LiveBlur => self.refresh_live(frame),
            BackgroundMode::StaticImage => {
                if !self.plane_holds_selection(size) && !self.draw_decoded(size) {
                    // `select` never leaves an image selected without its decode;
                    // blur rather than show a stale plane.
                    self.refresh_live(frame);
                }
            }
            BackgroundMode::SolidColor => {
                if !self.plane_holds_selection(size) {
                    if let BackgroundSelection::Color(rgb) = self.selection {
                        ensure_rgba(&mut self.plane, size.0, size.1);
                        let [r, g, b] = rgb;
                        for pixel in self.plane.pixels_mut() {
                            *pixel = Rgba([r, g, b, 255]);
                        }
                        self.content = Some(PlaneContent::Color { rgb, size });
                    }
                }
            }
        }

        &self.plane
    }

    pub fn plane(&self) -> &RgbaImage {
        &self.plane
    }

    fn plane_holds_selection(&self, size: (u32, u32)) -> bool {
        match (&self.content, &self.selection) {
            (Some(PlaneContent::Image { path, size: s }), BackgroundSelection::Image(selected)) => {
                path == selected && *s == size
            }
            (Some(PlaneContent::Color { rgb, size: s }), BackgroundSelection::Color(selected)) => {
                rgb == selected && *s == size
            }
            _ => false,
        }
    }

    /// Stretches the cached decode into the plane. Returns `false` if the
    /// cache does not hold the selected image.
    fn draw_decoded(&mut self, size: (u32, u32)) -> bool {
        let BackgroundSelection::Image(selected) = &self.selection else {
            return false;
        };
        let Some(decoded) = self.decoded.as_ref().filter(|d| d.path == *selected) else {
            return false;
        };
        self.stretch
            .rescale_rgba(&decoded.image, &mut self.plane, size.0, size.1);
        self.content = Some(PlaneContent::Image {
            path: decoded.path.clone(),
            size,
        });
        true
    }

    fn refresh_live(&mut self, frame: &RgbaImage) {
        let (width, height) = frame.dimensions();
        let (sw, sh) = scaled_dimensions(width, height, self.scale);

        self.downscale.rescale_rgba(frame, &mut self.small, sw, sh);
        ensure_rgba(&mut self.small_blurred, sw, sh);
        let blurred: &mut [u8] = &mut self.small_blurred;
        self.blur.apply(self.small.as_raw(), blurred, sw, sh, 4);
        self.upscale
            .rescale_rgba(&self.small_blurred, &mut self.plane, width, height);
        self.content = Some(PlaneContent::Live);
    }
}

impl Default for BackgroundProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND_SCALE, DEFAULT_BACKGROUND_BLUR)
    }
}

fn decode(path: &Path) -> Result<RgbaImage> {
    image::open(path)
        .map(|image| image.to_rgba8())
        .map_err(|source| PipelineError::BackgroundDecode {
            path: path.to_path_buf(),
            source,
        })
}

/// Parses `#RRGGBB` or `RRGGBB`.
pub fn parse_hex_color(value: &str) -> std::result::Result<[u8; 3], String> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("expected a colour like #0052CC, got {value:?}"));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("camola_bg_{}_{name}", std::process::id()))
    }

    #[test]
    fn live_blur_matches_frame_size() {
        let frame = RgbaImage::from_pixel(64, 48, Rgba([120, 60, 30, 255]));
        let mut provider = BackgroundProvider::default();
        let plane = provider.refresh(&frame);
        assert_eq!(plane.dimensions(), (64, 48));
        assert!(plane.pixels().all(|p| p.0 == [120, 60, 30, 255]));
        assert_eq!(provider.mode(), BackgroundMode::LiveBlur);
    }

    #[test]
    fn static_image_is_stretched_to_frame() {
        let path = temp_path("stretch.png");
        RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();

        let mut provider = BackgroundProvider::default();
        provider
            .select(BackgroundSelection::Image(path.clone()))
            .unwrap();
        let frame = RgbaImage::from_pixel(40, 30, Rgba([200, 200, 200, 255]));
        let plane = provider.refresh(&frame);
        assert_eq!(plane.dimensions(), (40, 30));
        assert!(plane.pixels().all(|p| p.0 == [1, 2, 3, 255]));
        assert_eq!(provider.mode(), BackgroundMode::StaticImage);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn reselecting_same_image_keeps_cache() {
        let path = temp_path("cache.png");
        RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();

        let mut provider = BackgroundProvider::default();
        provider
            .select(BackgroundSelection::Image(path.clone()))
            .unwrap();
        // Removing the file proves the second select does not decode again.
        std::fs::remove_file(&path).unwrap();
        provider.select(BackgroundSelection::None).unwrap();
        provider
            .select(BackgroundSelection::Image(path.clone()))
            .unwrap();
        assert_eq!(provider.mode(), BackgroundMode::StaticImage);
    }

    #[test]
    fn decode_failure_falls_back_to_live_blur() {
        let mut provider = BackgroundProvider::default();
        provider.select(BackgroundSelection::Color([5, 5, 5])).unwrap();

        let err = provider
            .select(BackgroundSelection::Image(temp_path("missing.png")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::BackgroundDecode { .. }));
        assert_eq!(provider.mode(), BackgroundMode::LiveBlur);

        let frame = RgbaImage::from_pixel(8, 8, Rgba([50, 50, 50, 255]));
        assert!(provider.refresh(&frame).pixels().all(|p| p.0 == [50, 50, 50, 255]));
    }

    #[test]
    fn solid_color_fills_plane() {
        let mut provider = BackgroundProvider::default();
        provider
            .select(BackgroundSelection::Color([0x00, 0x52, 0xCC]))
            .unwrap();
        let frame = RgbaImage::new(6, 4);
        let plane = provider.refresh(&frame);
        assert!(plane.pixels().all(|p| p.0 == [0x00, 0x52, 0xCC, 255]));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#0052CC"), Ok([0x00, 0x52, 0xCC]));
        assert_eq!(parse_hex_color("00b8d9"), Ok([0x00, 0xB8, 0xD9]));
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#zz0000").is_err());
    }
}
