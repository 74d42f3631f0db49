use anyhow::{Context, Result};

use crate::data::image::Image;

pub fn get_env(key: &str) -> Result<String> {
    std::env::var(key).context(format!("getting env variable `{key}`"))
}

/// Prints the image with background colors. Expects values in `[0, 1]`.
pub fn show_image_terminal_color(img: &Image) {
    for y in 0..img.height {
        for x in 0..img.width {
            let channel = |c: usize| {
                let v = img.get(y, x, c.min(img.channels - 1));
                (v.clamp(0.0, 1.0) * 255.0) as u8
            };
            let color = termion::color::Rgb(channel(0), channel(1), channel(2));
            print!("{} ", termion::color::Bg(color));
        }
        println!("{}", termion::color::Bg(termion::color::Reset));
    }
}

/// Maps normalized values back into `[0, 1]` for display.
pub fn rescale(img: &Image) -> Image {
    let (lo, hi) = img
        .pixels
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    let range = if hi > lo { hi - lo } else { 1.0 };
    Image::new(
        img.pixels.iter().map(|p| (p - lo) / range).collect(),
        img.height,
        img.width,
        img.channels,
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub dim: [usize; 3],
    pub value_range: [f32; 2],
    pub mean: f32,
    pub var: f32,
    pub stddev: f32,
}

impl Stats {
    /// Pixel statistics over equally sized images.
    pub fn from_iter(iter: impl Iterator<Item = Image>) -> Self {
        let mut s = 0.0;
        let mut s2 = 0.0;
        let mut count = 0;
        let mut dim = [0; 3];
        let mut value_range = [f32::MAX, f32::MIN];
        for item in iter {
            let d = item.pixels.len() as f32;
            dim = item.dims();
            item.pixels.iter().for_each(|x| {
                value_range[0] = value_range[0].min(*x);
                value_range[1] = value_range[1].max(*x);
            });

            s += item.pixels.iter().sum::<f32>() / d;
            s2 += item.pixels.iter().map(|x| x * x).sum::<f32>() / d;
            count += 1;
        }
        let count_f32 = count as f32;
        let mean = s / count_f32;
        let var = (s2 / count_f32) - mean * mean;
        let stddev = var.sqrt();
        Self {
            dim,
            value_range,
            mean,
            var,
            stddev,
        }
    }
}
