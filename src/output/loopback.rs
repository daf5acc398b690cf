use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use crate::imaging::{Rescaler, SmoothingQuality};

pub struct V4L2Output {
    // Held open so the negotiated format stays in effect.
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    resized: RgbaImage,
    rescaler: Rescaler,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        let applied = Output::set_format(&device, &format)
            .context("Failed to set YUYV output format")?;
        if (applied.width, applied.height) != (width, height) {
            tracing::warn!(
                "v4l2loopback negotiated {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            _device: device,
            file,
            width,
            height,
            resized: RgbaImage::new(0, 0),
            rescaler: Rescaler::new(SmoothingQuality::Medium),
            yuyv: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Convert an RGBA frame to YUV422 (YUYV), reusing `yuyv`
/// v4l2loopback typically expects YUYV format
fn rgba_to_yuyv(image: &RgbaImage, yuyv: &mut Vec<u8>) {
    let (width, height) = image.dimensions();
    yuyv.clear();

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
            let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

            // Average U and V for the pair of pixels
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            // YUYV format: Y0 U Y1 V
            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

/// Convert RGB to YUV color space
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let frame = if frame.dimensions() != (self.width, self.height) {
            self.rescaler
                .rescale_rgba(frame, &mut self.resized, self.width, self.height);
            &self.resized
        } else {
            frame
        };

        rgba_to_yuyv(frame, &mut self.yuyv);

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grey_levels_have_neutral_chroma() {
        assert_eq!(rgb_to_yuv(0, 0, 0), (0, 128, 128));
        let (y, u, v) = rgb_to_yuv(255, 255, 255);
        assert!(y >= 254);
        assert!((127..=128).contains(&u));
        assert!((127..=128).contains(&v));
    }

    #[test]
    fn yuyv_packs_two_pixels_per_four_bytes() {
        let image = RgbaImage::from_pixel(3, 2, image::Rgba([0, 0, 0, 255]));
        let mut out = Vec::new();
        rgba_to_yuyv(&image, &mut out);
        // Odd width pads the last pair with the edge pixel.
        assert_eq!(out.len(), 2 * 2 * 4);
        assert_eq!(&out[..4], &[0, 128, 0, 128]);
    }
}
