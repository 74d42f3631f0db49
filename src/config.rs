use std::str::FromStr;

use burn::config::Config;

use crate::error::DataError;

/// Dataset families the dispatcher knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    MultiMnist,
    Celeba,
    CifarSvhn,
}

impl FromStr for DatasetKind {
    type Err = DataError;

    /// Names are matched by substring so variants like `mnist_film` resolve
    /// to their family. The first match wins.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.contains("mnist") {
            Ok(Self::MultiMnist)
        } else if name.contains("celeba") {
            Ok(Self::Celeba)
        } else if name.contains("cifar_svhn") {
            Ok(Self::CifarSvhn)
        } else {
            Err(DataError::UnknownDataset(name.to_string()))
        }
    }
}

#[derive(Config)]
pub struct DatasetParams {
    pub dataset: String,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl DatasetParams {
    pub fn kind(&self) -> Result<DatasetKind, DataError> {
        self.dataset.parse()
    }
}

#[derive(Config)]
pub struct MnistConfig {
    /// Cache directory for the `mnist` hub dataset.
    pub path: String,
}

#[derive(Config)]
pub struct CelebaConfig {
    /// Root holding `img_align_celeba/` and the attribute/partition lists.
    pub path: String,
    #[config(default = 64)]
    pub img_rows: u32,
    #[config(default = 64)]
    pub img_cols: u32,
}

#[derive(Config)]
pub struct HubConfig {
    pub path: String,
}

#[derive(Config)]
pub struct DatasetConfigs {
    pub mnist: MnistConfig,
    pub celeba: CelebaConfig,
    pub cifar10: HubConfig,
    pub svhn: HubConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_by_substring() {
        assert_eq!("mnist".parse::<DatasetKind>(), Ok(DatasetKind::MultiMnist));
        assert_eq!("mnist_film".parse::<DatasetKind>(), Ok(DatasetKind::MultiMnist));
        assert_eq!("celeba".parse::<DatasetKind>(), Ok(DatasetKind::Celeba));
        assert_eq!("cifar_svhn".parse::<DatasetKind>(), Ok(DatasetKind::CifarSvhn));
        assert_eq!(
            "cityscapes".parse::<DatasetKind>(),
            Err(DataError::UnknownDataset("cityscapes".to_string()))
        );
    }

    #[test]
    fn params_defaults() {
        let params = DatasetParams::new("celeba".to_string()).with_batch_size(8);
        assert_eq!(params.batch_size, 8);
        assert_eq!(params.num_workers, 4);
        assert_eq!(params.seed, 42);
        assert_eq!(params.kind(), Ok(DatasetKind::Celeba));
    }

    #[test]
    fn celeba_image_size_defaults() {
        let config = CelebaConfig::new("/data/celeba".to_string());
        assert_eq!((config.img_rows, config.img_cols), (64, 64));
    }
}
