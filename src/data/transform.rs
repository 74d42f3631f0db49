//! Item-level preprocessing and augmentation.
//!
//! Every transform consumes an [`Image`] and returns a new one, drawing its
//! randomness from the caller's generator so pipelines can be seeded in
//! tests. [`TransformMapper`] plugs a pipeline into burn's `MapperDataset`.

use burn::data::dataset::transform::{Mapper, MapperDataset};
use image::{imageops, ImageBuffer, Luma, Pixel, Rgb, Rgba};
use rand::{seq::SliceRandom, Rng, RngCore};

use super::image::{Image, ImageItem};

pub trait Transform: Send + Sync {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image;
}

pub struct Compose(pub Vec<Box<dyn Transform>>);

impl Compose {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn then(mut self, transform: impl Transform + 'static) -> Self {
        self.0.push(Box::new(transform));
        self
    }
}

impl Default for Compose {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Compose {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        self.0.iter().fold(image, |img, t| t.apply(img, rng))
    }
}

type FloatBuffer<P> = ImageBuffer<P, Vec<f32>>;

fn to_buffer<P: Pixel<Subpixel = f32>>(image: &Image) -> Option<FloatBuffer<P>> {
    if image.channels != P::CHANNEL_COUNT as usize {
        return None;
    }
    ImageBuffer::from_raw(image.width as u32, image.height as u32, image.pixels.clone())
}

fn from_buffer<P: Pixel<Subpixel = f32>>(buffer: FloatBuffer<P>) -> Image {
    let (width, height) = buffer.dimensions();
    Image::new(
        buffer.into_raw(),
        height as usize,
        width as usize,
        P::CHANNEL_COUNT as usize,
    )
}

/// Runs `op` on the image viewed as a luma, RGB or RGBA `f32` buffer.
macro_rules! on_buffer {
    ($image:expr, |$buffer:ident| $op:expr) => {
        match $image.channels {
            1 => to_buffer::<Luma<f32>>($image).map(|$buffer| from_buffer($op)),
            3 => to_buffer::<Rgb<f32>>($image).map(|$buffer| from_buffer($op)),
            4 => to_buffer::<Rgba<f32>>($image).map(|$buffer| from_buffer($op)),
            _ => None,
        }
    };
}

/// Per-channel `(x - mean) / std`.
#[derive(Debug, Clone)]
pub struct Normalize {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Normalize {
    pub fn new(mean: &[f32], std: &[f32]) -> Self {
        debug_assert_eq!(mean.len(), std.len());
        Self {
            mean: mean.to_vec(),
            std: std.to_vec(),
        }
    }
}

impl Transform for Normalize {
    fn apply(&self, mut image: Image, _rng: &mut dyn RngCore) -> Image {
        let channels = image.channels;
        for (i, p) in image.pixels.iter_mut().enumerate() {
            let c = (i % channels).min(self.mean.len() - 1);
            *p = (*p - self.mean[c]) / self.std[c];
        }
        image
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadMode {
    Constant(f32),
    /// Mirror around the edge pixel without repeating it.
    Reflect,
}

#[derive(Debug, Clone, Copy)]
pub struct Pad {
    pub padding: usize,
    pub mode: PadMode,
}

impl Pad {
    pub fn new(padding: usize, mode: PadMode) -> Self {
        Self { padding, mode }
    }

    pub fn pad(&self, image: &Image) -> Image {
        match self.mode {
            PadMode::Constant(fill) => {
                let p = self.padding as u32;
                on_buffer!(image, |buffer| pad_constant(&buffer, p, fill))
                    .unwrap_or_else(|| self.pad_by_index(image))
            }
            PadMode::Reflect => self.pad_by_index(image),
        }
    }

    fn pad_by_index(&self, image: &Image) -> Image {
        let p = self.padding as isize;
        let (h, w, c) = (image.height, image.width, image.channels);
        let mut out = Image::zeros(h + 2 * self.padding, w + 2 * self.padding, c);

        for y in 0..out.height {
            for x in 0..out.width {
                let src_y = reflect(y as isize - p, h);
                let src_x = reflect(x as isize - p, w);
                let inside = (y as isize - p) >= 0
                    && (y as isize - p) < h as isize
                    && (x as isize - p) >= 0
                    && (x as isize - p) < w as isize;
                for ch in 0..c {
                    let value = match self.mode {
                        PadMode::Constant(fill) if !inside => fill,
                        _ => image.get(src_y, src_x, ch),
                    };
                    out.set(y, x, ch, value);
                }
            }
        }
        out
    }
}

fn pad_constant<P: Pixel<Subpixel = f32>>(
    buffer: &FloatBuffer<P>,
    padding: u32,
    fill: f32,
) -> FloatBuffer<P> {
    let (width, height) = buffer.dimensions();
    let fill = vec![fill; P::CHANNEL_COUNT as usize];
    let mut canvas = FloatBuffer::<P>::from_pixel(
        width + 2 * padding,
        height + 2 * padding,
        *P::from_slice(&fill),
    );
    imageops::replace(&mut canvas, buffer, padding.into(), padding.into());
    canvas
}

fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut i = i.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

impl Transform for Pad {
    fn apply(&self, image: Image, _rng: &mut dyn RngCore) -> Image {
        self.pad(&image)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RandomCrop {
    pub height: usize,
    pub width: usize,
    pub padding: Option<Pad>,
}

impl RandomCrop {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: usize, mode: PadMode) -> Self {
        self.padding = Some(Pad::new(padding, mode));
        self
    }

    pub fn crop(image: &Image, top: usize, left: usize, height: usize, width: usize) -> Image {
        let (x, y, w, h) = (left as u32, top as u32, width as u32, height as u32);
        on_buffer!(image, |buffer| imageops::crop_imm(&buffer, x, y, w, h).to_image())
            .unwrap_or_else(|| {
                log::warn!("cannot crop a {}-channel image", image.channels);
                image.clone()
            })
    }
}

impl Transform for RandomCrop {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        let image = match &self.padding {
            Some(pad) => pad.pad(&image),
            None => image,
        };
        if image.height < self.height || image.width < self.width {
            log::warn!(
                "crop {}x{} larger than image {}x{}, leaving it untouched",
                self.height,
                self.width,
                image.height,
                image.width
            );
            return image;
        }
        let top = rng.gen_range(0..=image.height - self.height);
        let left = rng.gen_range(0..=image.width - self.width);
        Self::crop(&image, top, left, self.height, self.width)
    }
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct RandomHorizontalFlip {
    pub p: f64,
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

pub fn flip_horizontal(image: &Image) -> Image {
    on_buffer!(image, |buffer| {
        let mut buffer = buffer;
        imageops::flip_horizontal_in_place(&mut buffer);
        buffer
    })
    .unwrap_or_else(|| {
        log::warn!("cannot flip a {}-channel image", image.channels);
        image.clone()
    })
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, image: Image, rng: &mut dyn RngCore) -> Image {
        if rng.gen_bool(self.p) {
            flip_horizontal(&image)
        } else {
            image
        }
    }
}

/// Randomly scales brightness, contrast and saturation. Each factor is
/// drawn uniformly from its range and the adjustments run in a random order.
#[derive(Debug, Clone, Copy)]
pub struct ColorJitter {
    pub brightness: Option<(f32, f32)>,
    pub contrast: Option<(f32, f32)>,
    pub saturation: Option<(f32, f32)>,
}

#[derive(Debug, Clone, Copy)]
enum Adjust {
    Brightness,
    Contrast,
    Saturation,
}

impl ColorJitter {
    pub fn new() -> Self {
        Self {
            brightness: None,
            contrast: None,
            saturation: None,
        }
    }

    /// Symmetric brightness range `[max(0, 1 - b), 1 + b]`.
    pub fn with_brightness(mut self, b: f32) -> Self {
        self.brightness = Some(((1.0 - b).max(0.0), 1.0 + b));
        self
    }

    pub fn with_contrast(mut self, lo: f32, hi: f32) -> Self {
        self.contrast = Some((lo, hi));
        self
    }

    pub fn with_saturation(mut self, lo: f32, hi: f32) -> Self {
        self.saturation = Some((lo, hi));
        self
    }
}

impl Default for ColorJitter {
    fn default() -> Self {
        Self::new()
    }
}

fn gray(image: &Image, y: usize, x: usize) -> f32 {
    if image.channels < 3 {
        return image.get(y, x, 0);
    }
    0.299 * image.get(y, x, 0) + 0.587 * image.get(y, x, 1) + 0.114 * image.get(y, x, 2)
}

fn blend(image: &mut Image, factor: f32, other: impl Fn(&Image, usize, usize) -> f32) {
    let source = image.clone();
    for y in 0..image.height {
        for x in 0..image.width {
            let o = other(&source, y, x);
            for c in 0..image.channels {
                let v = factor * source.get(y, x, c) + (1.0 - factor) * o;
                image.set(y, x, c, v.clamp(0.0, 1.0));
            }
        }
    }
}

pub fn adjust_brightness(mut image: Image, factor: f32) -> Image {
    blend(&mut image, factor, |_, _, _| 0.0);
    image
}

pub fn adjust_contrast(mut image: Image, factor: f32) -> Image {
    let n = (image.height * image.width) as f32;
    let mut mean = 0.0;
    for y in 0..image.height {
        for x in 0..image.width {
            mean += gray(&image, y, x);
        }
    }
    let mean = mean / n;
    blend(&mut image, factor, |_, _, _| mean);
    image
}

pub fn adjust_saturation(mut image: Image, factor: f32) -> Image {
    blend(&mut image, factor, gray);
    image
}

impl Transform for ColorJitter {
    fn apply(&self, mut image: Image, rng: &mut dyn RngCore) -> Image {
        let mut order = [Adjust::Brightness, Adjust::Contrast, Adjust::Saturation];
        order.shuffle(rng);

        for adjust in order {
            let range = match adjust {
                Adjust::Brightness => self.brightness,
                Adjust::Contrast => self.contrast,
                Adjust::Saturation => self.saturation,
            };
            let Some((lo, hi)) = range else { continue };
            let factor = if hi > lo { rng.gen_range(lo..hi) } else { lo };
            image = match adjust {
                Adjust::Brightness => adjust_brightness(image, factor),
                Adjust::Contrast => adjust_contrast(image, factor),
                Adjust::Saturation => adjust_saturation(image, factor),
            };
        }
        image
    }
}

pub type Transformed<D> = MapperDataset<D, TransformMapper, ImageItem>;

/// Runs a transform over dataset items, leaving labels untouched.
pub struct TransformMapper {
    transform: Box<dyn Transform>,
}

impl TransformMapper {
    pub fn new(transform: impl Transform + 'static) -> Self {
        Self {
            transform: Box::new(transform),
        }
    }
}

impl Mapper<ImageItem, ImageItem> for TransformMapper {
    fn map(&self, item: &ImageItem) -> ImageItem {
        let mut rng = rand::thread_rng();
        ImageItem {
            image: self.transform.apply(item.image.clone(), &mut rng),
            labels: item.labels.clone(),
        }
    }
}
