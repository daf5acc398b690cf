use image::GrayImage;

/// Single-channel 8-bit grid reused across frames.
///
/// Storage is only reallocated when the requested dimensions change, so a
/// steady-state pipeline performs no per-frame allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MaskBuffer {
    /// Allocates a zero-filled grid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize,
            "mask data length does not match {width}x{height}"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Resizes to `width`x`height`, returning `true` if storage was reallocated.
    ///
    /// Contents are unspecified after a reallocation; callers overwrite every
    /// pixel before reading.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.data = vec![0; width as usize * height as usize];
        true
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} mask",
            self.width,
            self.height
        );
        y as usize * self.width as usize + x as usize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn max_value(&self) -> u8 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Copies `other` into this buffer, resizing only if needed.
    pub fn copy_from(&mut self, other: &MaskBuffer) {
        self.resize_if_needed(other.width, other.height);
        self.data.copy_from_slice(&other.data);
    }

    /// Grayscale copy for debugging and the matte view.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Samples of a mask as handed over by the segmentation model.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskSamples {
    /// Intensity 0-255.
    Intensity(Vec<u8>),
    /// Probability 0.0-1.0.
    Probability(Vec<f32>),
}

/// Mask produced by the segmentation model at its native resolution.
///
/// Treated as foreign data: the pipeline only reads it and copies the result
/// into its own buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMask {
    width: u32,
    height: u32,
    samples: MaskSamples,
}

impl RawMask {
    pub fn from_intensity(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            samples: MaskSamples::Intensity(data),
        }
    }

    pub fn from_probability(width: u32, height: u32, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            samples: MaskSamples::Probability(data),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> &MaskSamples {
        &self.samples
    }

    /// Sample at `(x, y)` expressed as 0-255 intensity.
    #[inline]
    pub fn intensity(&self, x: u32, y: u32) -> u8 {
        let idx = y as usize * self.width as usize + x as usize;
        match &self.samples {
            MaskSamples::Intensity(data) => data[idx],
            MaskSamples::Probability(data) => probability_to_intensity(data[idx]),
        }
    }
}

#[inline]
pub fn probability_to_intensity(p: f32) -> u8 {
    (p * 255.0).round().clamp(0.0, 255.0) as u8
}
