use image::{DynamicImage, GrayImage, RgbImage};

/// Dense image stored row-major as `height x width x channels` floats.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Image {
    pub fn new(pixels: Vec<f32>, height: usize, width: usize, channels: usize) -> Self {
        debug_assert_eq!(pixels.len(), height * width * channels);
        Self {
            pixels,
            height,
            width,
            channels,
        }
    }

    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self::new(vec![0.0; height * width * channels], height, width, channels)
    }

    /// Decodes into `[0, 1]` floats. One channel means luma, anything else RGB.
    pub fn from_dynamic(img: &DynamicImage, channels: usize) -> Self {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let pixels = if channels == 1 {
            img.to_luma8().into_raw()
        } else {
            img.to_rgb8().into_raw()
        };
        let channels = if channels == 1 { 1 } else { 3 };
        Self::new(
            pixels.into_iter().map(|p| p as f32 / 255.0).collect(),
            height,
            width,
            channels,
        )
    }

    /// Inverse of [`Image::from_dynamic`]; values are clamped to `[0, 1]`.
    pub fn to_dynamic(&self) -> DynamicImage {
        let raw = self
            .pixels
            .iter()
            .map(|p| (p.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        let (w, h) = (self.width as u32, self.height as u32);
        match self.channels {
            1 => GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
        }
        .unwrap_or_else(|| DynamicImage::new_rgb8(w, h))
    }

    #[inline]
    pub fn index(&self, y: usize, x: usize, c: usize) -> usize {
        (y * self.width + x) * self.channels + c
    }

    #[inline]
    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.pixels[self.index(y, x, c)]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, c: usize, value: f32) {
        let i = self.index(y, x, c);
        self.pixels[i] = value;
    }

    /// Builds an image from planar `channels x height x width` values.
    pub fn from_chw(values: &[f32], channels: usize, height: usize, width: usize) -> Self {
        let mut img = Self::zeros(height, width, channels);
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    img.set(y, x, c, values[(c * height + y) * width + x]);
                }
            }
        }
        img
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }
}

#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: Image,
    pub labels: Vec<i64>,
}
