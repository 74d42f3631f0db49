use std::sync::Arc;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::{transform::MapperDataset, Dataset},
    },
    tensor::{backend::Backend, Data, Int, Shape, Tensor},
};

use crate::config::{DatasetConfigs, DatasetKind, DatasetParams};

use self::{
    celeba::{CelebaDataset, Split},
    image::ImageItem,
    mnist::MultiMnistDataset,
    split::truncate_to_batches,
    transform::{Transformed, TransformMapper},
};

pub mod celeba;
pub mod cifar_svhn;
pub mod hub;
pub mod image;
pub mod mnist;
pub mod split;
pub mod transform;

/// Batch size of the Multi-MNIST validation and test loaders.
pub const EVAL_BATCH_SIZE: usize = 100;

pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// N x C x H x W
    pub img: Tensor<B, 4>,
    /// N x L, one column per label of the item
    pub labels: Tensor<B, 2, Int>,
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let img = items
            .iter()
            .map(|item| Data::new(item.image.pixels.clone(), Shape::new(item.image.dims())))
            .map(|data| Tensor::<B, 3>::from_floats(data, &self.device))
            .map(|tensor|
                 // H x W x C -> C x W x H
                 tensor.swap_dims(0, 2)
                 // C x W x H -> C x H x W
                 .transpose())
            .collect();

        let num_labels = items.first().map(|item| item.labels.len()).unwrap_or(0);
        let labels = items
            .iter()
            .flat_map(|item| item.labels.iter().map(|label| *label as i32))
            .collect();
        let labels = Tensor::<B, 2, Int>::from_ints(
            Data::new(labels, Shape::new([items.len(), num_labels])),
            &self.device,
        );

        let img = Tensor::stack(img, 0);

        ImageBatch { img, labels }
    }
}

pub type Loader<B> = Arc<dyn DataLoader<ImageBatch<B>>>;

pub struct SplitLoaders<B: Backend> {
    pub train: Loader<B>,
    pub val: Loader<B>,
    pub test: Loader<B>,
    pub train_len: usize,
    pub val_len: usize,
    pub test_len: usize,
}

pub enum Loaders<B: Backend> {
    MultiMnist(SplitLoaders<B>),
    Celeba(SplitLoaders<B>),
    CifarSvhn {
        cifar: SplitLoaders<B>,
        svhn: SplitLoaders<B>,
    },
}

impl<B: Backend> Loaders<B> {
    /// Every benchmark with its name, in a fixed order.
    pub fn named(&self) -> Vec<(&'static str, &SplitLoaders<B>)> {
        match self {
            Loaders::MultiMnist(loaders) => vec![("multi_mnist", loaders)],
            Loaders::Celeba(loaders) => vec![("celeba", loaders)],
            Loaders::CifarSvhn { cifar, svhn } => vec![("cifar10", cifar), ("svhn", svhn)],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LoaderOptions {
    batch_size: usize,
    num_workers: usize,
    shuffle: Option<u64>,
}

fn build_loader<B, D>(dataset: D, device: &B::Device, options: LoaderOptions) -> Loader<B>
where
    B: Backend,
    D: Dataset<ImageItem> + 'static,
{
    let builder = DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone()))
        .batch_size(options.batch_size)
        .num_workers(options.num_workers);
    match options.shuffle {
        Some(seed) => builder.shuffle(seed).build(dataset),
        None => builder.build(dataset),
    }
}

/// Builds the train/val/test loaders of the family named by `params.dataset`.
pub fn get_dataset<B: Backend>(
    params: &DatasetParams,
    configs: &DatasetConfigs,
    device: &B::Device,
) -> anyhow::Result<Loaders<B>> {
    let kind = params.kind()?;
    log::info!("building `{}` loaders as {kind:?}", params.dataset);

    let train_options = LoaderOptions {
        batch_size: params.batch_size,
        num_workers: params.num_workers,
        shuffle: Some(params.seed),
    };
    let eval_options = LoaderOptions {
        shuffle: None,
        ..train_options
    };

    match kind {
        DatasetKind::MultiMnist => {
            let path = &configs.mnist.path;
            let normalized = |dataset: MultiMnistDataset| -> Transformed<MultiMnistDataset> {
                MapperDataset::new(dataset, TransformMapper::new(mnist::normalization()))
            };
            let train = normalized(MultiMnistDataset::train(path, params.seed)?);
            let val = normalized(MultiMnistDataset::val(path, params.seed)?);
            let test = normalized(MultiMnistDataset::test(path, params.seed)?);
            let eval_options = LoaderOptions {
                batch_size: EVAL_BATCH_SIZE,
                ..eval_options
            };

            Ok(Loaders::MultiMnist(SplitLoaders {
                train_len: Dataset::<ImageItem>::len(&train),
                val_len: Dataset::<ImageItem>::len(&val),
                test_len: Dataset::<ImageItem>::len(&test),
                train: build_loader(train, device, train_options),
                val: build_loader(val, device, eval_options),
                test: build_loader(test, device, eval_options),
            }))
        }
        DatasetKind::Celeba => {
            let config = &configs.celeba;
            let open = |split| {
                CelebaDataset::new(&config.path, split, config.img_rows, config.img_cols)
            };
            let train = open(Split::Train)?;
            let val = open(Split::Val)?;
            let test = open(Split::Test)?;

            Ok(Loaders::Celeba(SplitLoaders {
                train_len: train.len(),
                val_len: val.len(),
                test_len: test.len(),
                train: build_loader(train, device, train_options),
                val: build_loader(val, device, eval_options),
                test: build_loader(test, device, eval_options),
            }))
        }
        DatasetKind::CifarSvhn => {
            let paired = |splits: cifar_svhn::Splits| {
                let train = truncate_to_batches::<ImageItem>(splits.train, params.batch_size);
                let val = truncate_to_batches::<ImageItem>(splits.val, params.batch_size);
                let test = splits.test;
                SplitLoaders {
                    train_len: train.len(),
                    val_len: val.len(),
                    test_len: Dataset::<ImageItem>::len(&test),
                    train: build_loader(train, device, train_options),
                    val: build_loader(val, device, eval_options),
                    test: build_loader(test, device, eval_options),
                }
            };

            Ok(Loaders::CifarSvhn {
                cifar: paired(cifar_svhn::cifar10(&configs.cifar10.path)?),
                svhn: paired(cifar_svhn::svhn(&configs.svhn.path)?),
            })
        }
    }
}
