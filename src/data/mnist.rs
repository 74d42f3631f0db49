//! Multi-MNIST: two overlapping digits per image, one label per digit.

use std::sync::Arc;

use burn::data::dataset::Dataset;
use image::{imageops::FilterType, DynamicImage};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::{
    hub::{HubImageDataset, ImageRow},
    image::{Image, ImageItem},
    transform::Normalize,
};

pub const IMG_SIZE: usize = 28;
pub const IMG_CHANNELS: usize = 1;
/// Offset of the second digit on the composition canvas.
pub const SHIFT: usize = 8;
/// Rows of the hub train split used for training; the rest is validation.
pub const TRAIN_ROWS: usize = 50_000;

pub fn normalization() -> Normalize {
    Normalize::new(&[0.1307], &[0.3081])
}

/// Places `left` at the top-left and `right` at the bottom-right of a canvas
/// `SHIFT` pixels larger, keeps the brighter pixel where they overlap and
/// scales the result back to the size of `left`.
pub fn overlay(left: &Image, right: &Image) -> Image {
    let (h, w) = (left.height, left.width);
    let mut canvas = Image::zeros(h + SHIFT, w + SHIFT, 1);
    for y in 0..h {
        for x in 0..w {
            canvas.set(y, x, 0, left.get(y, x, 0));
        }
    }
    for y in 0..right.height {
        for x in 0..right.width {
            let (cy, cx) = (y + SHIFT, x + SHIFT);
            if cy < canvas.height && cx < canvas.width {
                let v = canvas.get(cy, cx, 0).max(right.get(y, x, 0));
                canvas.set(cy, cx, 0, v);
            }
        }
    }

    let resized = image::imageops::resize(
        &canvas.to_dynamic().to_luma8(),
        w as u32,
        h as u32,
        FilterType::Triangle,
    );
    Image::from_dynamic(&DynamicImage::ImageLuma8(resized), 1)
}

pub struct MultiMnistDataset {
    source: Arc<dyn Dataset<ImageItem>>,
    indices: Vec<usize>,
    partners: Vec<usize>,
}

impl MultiMnistDataset {
    /// Pairs every index with a partner drawn from the same index list.
    pub fn new(source: Arc<dyn Dataset<ImageItem>>, indices: Vec<usize>, seed: u64) -> Self {
        let n = indices.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let partners = order
            .into_iter()
            .enumerate()
            .map(|(k, p)| if p == k && n > 1 { (k + 1) % n } else { p })
            .map(|p| indices[p])
            .collect();

        Self {
            source,
            indices,
            partners,
        }
    }

    pub fn train(base_dir: &str, seed: u64) -> anyhow::Result<Self> {
        let source = Self::hub(base_dir, "train")?;
        let end = TRAIN_ROWS.min(source.len());
        Ok(Self::new(source, (0..end).collect(), seed))
    }

    pub fn val(base_dir: &str, seed: u64) -> anyhow::Result<Self> {
        let source = Self::hub(base_dir, "train")?;
        let start = TRAIN_ROWS.min(source.len());
        let end = source.len();
        Ok(Self::new(source, (start..end).collect(), seed))
    }

    pub fn test(base_dir: &str, seed: u64) -> anyhow::Result<Self> {
        let source = Self::hub(base_dir, "test")?;
        let end = source.len();
        Ok(Self::new(source, (0..end).collect(), seed))
    }

    fn hub(base_dir: &str, split: &str) -> anyhow::Result<Arc<dyn Dataset<ImageItem>>> {
        let dataset =
            HubImageDataset::<ImageRow>::load("mnist", None, base_dir, split, IMG_CHANNELS)?;
        Ok(Arc::new(dataset))
    }
}

impl Dataset<ImageItem> for MultiMnistDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let left = self.source.get(*self.indices.get(index)?)?;
        let right = self.source.get(self.partners[index])?;
        Some(ImageItem {
            image: overlay(&left.image, &right.image),
            labels: vec![left.labels[0], right.labels[0]],
        })
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;

    fn digit(label: i64, value: f32) -> ImageItem {
        ImageItem {
            image: Image::new(vec![value; IMG_SIZE * IMG_SIZE], IMG_SIZE, IMG_SIZE, 1),
            labels: vec![label],
        }
    }

    fn source() -> Arc<dyn Dataset<ImageItem>> {
        Arc::new(InMemDataset::new(
            (0..10).map(|i| digit(i, i as f32 / 10.0)).collect(),
        ))
    }

    #[test]
    fn overlay_keeps_size() {
        let out = overlay(&digit(0, 1.0).image, &digit(1, 0.0).image);
        assert_eq!(out.dims(), [IMG_SIZE, IMG_SIZE, 1]);
        // the left digit covers the top-left corner only
        assert!(out.get(0, 0, 0) > 0.9);
        assert!(out.get(IMG_SIZE - 1, IMG_SIZE - 1, 0) < 0.1);
    }

    #[test]
    fn items_carry_two_labels() {
        let dataset = MultiMnistDataset::new(source(), (0..10).collect(), 42);
        assert_eq!(dataset.len(), 10);
        for i in 0..dataset.len() {
            let item = dataset.get(i).unwrap();
            assert_eq!(item.labels.len(), 2);
            assert_eq!(item.labels[0], i as i64);
            assert_ne!(item.labels[0], item.labels[1]);
        }
        assert!(dataset.get(10).is_none());
    }

    #[test]
    fn partners_stay_in_split() {
        let dataset = MultiMnistDataset::new(source(), (5..10).collect(), 1);
        for i in 0..dataset.len() {
            let item = dataset.get(i).unwrap();
            assert!((5..10).contains(&item.labels[1]));
        }
    }

    #[test]
    fn pairing_is_seeded() {
        let a = MultiMnistDataset::new(source(), (0..10).collect(), 3);
        let b = MultiMnistDataset::new(source(), (0..10).collect(), 3);
        assert_eq!(a.partners, b.partners);
    }
}
