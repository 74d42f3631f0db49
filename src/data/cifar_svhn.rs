//! CIFAR-10 and SVHN, used together as a paired classification benchmark.

use std::sync::Arc;

use burn::data::dataset::{transform::MapperDataset, Dataset};

use super::{
    hub::{HubImageDataset, ImageRow, ImgRow, RawImageRow},
    image::ImageItem,
    split::{random_split, Subset},
    transform::{
        ColorJitter, Compose, Normalize, Pad, PadMode, RandomCrop, RandomHorizontalFlip,
        TransformMapper, Transformed,
    },
};

pub const IMG_SIZE: usize = 32;
pub const IMG_CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
/// Share of the hub train split kept for training; the rest validates.
pub const TRAIN_FRACTION: f64 = 0.8;
pub const SPLIT_SEED: u64 = 42;

pub const CIFAR_CLASSES: [&str; NUM_CLASSES] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub fn cifar_normalization() -> Normalize {
    Normalize::new(&[0.4914, 0.4822, 0.4465], &[0.2023, 0.1994, 0.2010])
}

pub fn cifar_augmentation() -> Compose {
    Compose::new()
        .then(RandomCrop::new(IMG_SIZE, IMG_SIZE).with_padding(4, PadMode::Reflect))
        .then(RandomHorizontalFlip::default())
}

pub fn svhn_normalization() -> Normalize {
    Normalize::new(
        &[0.437_682_1, 0.443_769_7, 0.472_804_42],
        &[0.198_030_12, 0.201_015_62, 0.197_036_14],
    )
}

pub fn svhn_augmentation() -> Compose {
    Compose::new()
        .then(Pad::new(2, PadMode::Constant(0.0)))
        .then(RandomCrop::new(IMG_SIZE, IMG_SIZE))
        .then(
            ColorJitter::new()
                .with_brightness(63.0 / 255.0)
                .with_saturation(0.5, 1.5)
                .with_contrast(0.2, 1.8),
        )
}

/// Train/val/test datasets of one benchmark, already transformed.
pub struct Splits {
    pub train: Transformed<Subset<ImageItem>>,
    pub val: Transformed<Subset<ImageItem>>,
    pub test: Transformed<Subset<ImageItem>>,
}

/// Splits the hub train rows into train/val, augments the train part and
/// normalizes all three.
pub fn build_splits(
    name: &str,
    train_val: Arc<dyn Dataset<ImageItem>>,
    test: Arc<dyn Dataset<ImageItem>>,
    augmentation: Compose,
    normalization: fn() -> Normalize,
) -> Splits {
    let (train, val) = random_split(train_val, TRAIN_FRACTION, SPLIT_SEED);
    let test_len = test.len();
    let test = Subset::range(test, 0, test_len);
    log::info!("{name} - train: {}", train.len());
    log::info!("{name} - val: {}", val.len());

    Splits {
        train: MapperDataset::new(
            train,
            TransformMapper::new(augmentation.then(normalization())),
        ),
        val: MapperDataset::new(val, TransformMapper::new(normalization())),
        test: MapperDataset::new(test, TransformMapper::new(normalization())),
    }
}

fn hub<R: RawImageRow + 'static>(
    name: &str,
    subset: Option<&str>,
    base_dir: &str,
    split: &str,
) -> anyhow::Result<Arc<dyn Dataset<ImageItem>>> {
    let dataset = HubImageDataset::<R>::load(name, subset, base_dir, split, IMG_CHANNELS)?;
    Ok(Arc::new(dataset))
}

pub fn cifar10(base_dir: &str) -> anyhow::Result<Splits> {
    Ok(build_splits(
        "CIFAR10",
        hub::<ImgRow>("cifar10", None, base_dir, "train")?,
        hub::<ImgRow>("cifar10", None, base_dir, "test")?,
        cifar_augmentation(),
        cifar_normalization,
    ))
}

pub fn svhn(base_dir: &str) -> anyhow::Result<Splits> {
    Ok(build_splits(
        "SVHN",
        hub::<ImageRow>("svhn", Some("cropped_digits"), base_dir, "train")?,
        hub::<ImageRow>("svhn", Some("cropped_digits"), base_dir, "test")?,
        svhn_augmentation(),
        svhn_normalization,
    ))
}
