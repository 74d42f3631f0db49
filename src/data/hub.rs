//! Image datasets cached from the Hugging Face hub into SQLite.

use std::path::PathBuf;

use burn::data::dataset::{Dataset, HuggingfaceDatasetLoader, SqliteDataset};
use serde::de::DeserializeOwned;

use super::image::{Image, ImageItem};

/// A hub row holding encoded image bytes and a class label.
pub trait RawImageRow: Clone + Send + Sync + DeserializeOwned {
    fn bytes(&self) -> &[u8];
    fn label(&self) -> i64;
}

/// CIFAR-10 stores its picture in the `img` column.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImgRow {
    pub img_bytes: Vec<u8>,
    pub img_path: Option<PathBuf>,
    pub label: i64,
    pub row_id: i64,
}

impl RawImageRow for ImgRow {
    fn bytes(&self) -> &[u8] {
        &self.img_bytes
    }

    fn label(&self) -> i64 {
        self.label
    }
}

/// MNIST and SVHN store their picture in the `image` column.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImageRow {
    pub image_bytes: Vec<u8>,
    pub image_path: Option<PathBuf>,
    pub label: i64,
    pub row_id: i64,
}

impl RawImageRow for ImageRow {
    fn bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    fn label(&self) -> i64 {
        self.label
    }
}

/// Decodes hub rows into [`ImageItem`]s on access. Rows that fail to decode
/// are dropped when the dataset is built, so `get` only returns `None` past
/// `len()`.
pub struct HubImageDataset<R: RawImageRow> {
    rows: Box<dyn Dataset<R>>,
    readable: Vec<ReadableRow>,
    channels: usize,
    name: String,
}

#[derive(Debug, Clone, Copy)]
struct ReadableRow {
    index: usize,
    height: usize,
    width: usize,
}

impl<R: RawImageRow + 'static> HubImageDataset<R> {
    pub fn load(
        name: &str,
        subset: Option<&str>,
        base_dir: &str,
        split: &str,
        channels: usize,
    ) -> anyhow::Result<Self> {
        log::info!("loading `{name}` ({split}) from {base_dir}");
        let mut loader = HuggingfaceDatasetLoader::new(name).with_base_dir(base_dir);
        if let Some(subset) = subset {
            loader = loader.with_subset(subset);
        }
        let rows: SqliteDataset<R> = loader.dataset(split)?;
        Ok(Self::from_rows(rows, name, channels))
    }

    pub fn from_rows(rows: impl Dataset<R> + 'static, name: &str, channels: usize) -> Self {
        let readable = rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| match decode(&row, channels) {
                Ok(item) => Some(ReadableRow {
                    index,
                    height: item.image.height,
                    width: item.image.width,
                }),
                Err(err) => {
                    log::warn!("{name} - dropping row {index}: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();
        if readable.len() < rows.len() {
            log::warn!(
                "{name} - dropped {} undecodable rows",
                rows.len() - readable.len()
            );
        }

        Self {
            rows: Box::new(rows),
            readable,
            channels,
            name: name.to_string(),
        }
    }

    pub fn raw(&self, index: usize) -> Option<R> {
        self.rows.get(self.readable.get(index)?.index)
    }
}

pub fn decode<R: RawImageRow>(row: &R, channels: usize) -> image::ImageResult<ImageItem> {
    let img = image::load_from_memory(row.bytes())?;
    Ok(ImageItem {
        image: Image::from_dynamic(&img, channels),
        labels: vec![row.label()],
    })
}

impl<R: RawImageRow> Dataset<ImageItem> for HubImageDataset<R> {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let readable = *self.readable.get(index)?;
        let row = self.rows.get(readable.index)?;
        match decode(&row, self.channels) {
            Ok(item) => Some(item),
            // the row decoded when the dataset was built
            Err(err) => {
                log::error!("{} row {}: {err}, using a blank image", self.name, readable.index);
                Some(ImageItem {
                    image: Image::zeros(readable.height, readable.width, self.channels),
                    labels: vec![row.label()],
                })
            }
        }
    }

    fn len(&self) -> usize {
        self.readable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;
    use image::{DynamicImage, ImageOutputFormat, RgbImage};
    use std::io::Cursor;

    fn png_row(label: i64) -> ImageRow {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 51])));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        ImageRow {
            image_bytes: bytes,
            image_path: None,
            label,
            row_id: 0,
        }
    }

    #[test]
    fn decodes_png_rows() {
        let item = decode(&png_row(4), 3).unwrap();
        assert_eq!(item.labels, vec![4]);
        assert_eq!(item.image.dims(), [2, 4, 3]);
        assert_eq!(item.image.get(1, 3, 0), 1.0);
        assert_eq!(item.image.get(1, 3, 1), 0.0);
        assert!((item.image.get(1, 3, 2) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn decodes_as_luma() {
        let item = decode(&png_row(1), 1).unwrap();
        assert_eq!(item.image.dims(), [2, 4, 1]);
    }

    fn garbage_row(label: i64) -> ImageRow {
        ImageRow {
            image_bytes: b"not an image".to_vec(),
            image_path: None,
            label,
            row_id: 0,
        }
    }

    #[test]
    fn undecodable_rows_are_dropped() {
        let rows = InMemDataset::new(vec![png_row(0), garbage_row(1), png_row(2), png_row(3)]);
        let dataset = HubImageDataset::from_rows(rows, "svhn", 3);
        assert_eq!(dataset.len(), 3);
        let labels = dataset.iter().map(|item| item.labels[0]).collect::<Vec<_>>();
        assert_eq!(labels, vec![0, 2, 3]);
        assert_eq!(dataset.raw(1).map(|row| row.label), Some(2));
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn loader_skips_undecodable_rows() {
        use crate::data::ImageBatcher;
        use burn::data::dataloader::DataLoaderBuilder;

        let rows = (0..10)
            .map(|i| if i == 2 { garbage_row(i) } else { png_row(i) })
            .collect();
        let dataset = HubImageDataset::from_rows(InMemDataset::new(rows), "mnist", 1);

        let loader = DataLoaderBuilder::new(ImageBatcher::<burn::backend::NdArray>::new(
            Default::default(),
        ))
        .batch_size(2)
        .shuffle(5)
        .build(dataset);

        let mut labels = loader
            .iter()
            .flat_map(|batch| batch.labels.into_data().convert::<i64>().value)
            .collect::<Vec<_>>();
        labels.sort();
        assert_eq!(labels, vec![0, 1, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn garbage_bytes_fail() {
        let row = ImageRow {
            image_bytes: vec![1, 2, 3],
            image_path: None,
            label: 0,
            row_id: 0,
        };
        assert!(decode(&row, 3).is_err());
    }
}
